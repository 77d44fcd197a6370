//! Forest evaluation.
//!
//! [`Predictor`] runs regression-style evaluation (scores only);
//! [`Classifier`] layers label selection on top. Both share the same
//! five-regime parallel driver and the same aggregation machinery.

mod aggregator;
mod classifier;
mod output;
mod predictor;
mod transform;

pub use classifier::{ClassLabels, Classifier, Labels};
pub use output::Prediction;
pub use predictor::{
    Predictor, DEFAULT_ROW_CHUNK, DEFAULT_ROW_PARALLEL_THRESHOLD,
    DEFAULT_TREE_PARALLEL_THRESHOLD,
};

/// A shape defect detected when an evaluation is issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// A node tests a feature the input rows do not have.
    #[error("a node tests feature {}, but input rows have only {width} features", required - 1)]
    FeatureOutOfRange { required: usize, width: usize },
    /// Caller-provided output buffer has the wrong length.
    #[error("output buffer holds {got} values, expected {expected}")]
    OutputSize { expected: usize, got: usize },
    /// Classifier label table does not match the class count.
    #[error("classifier configured with {got} labels for {expected} classes")]
    LabelCount { expected: usize, got: usize },
}
