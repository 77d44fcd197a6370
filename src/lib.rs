//! canopy: compiled decision-tree-ensemble inference for Rust.
//!
//! This crate takes a flat description of a tree ensemble (tens to millions
//! of nodes across many trees), compiles it into a cache-friendly immutable
//! [`Forest`](repr::Forest), and evaluates it in parallel over batches of
//! input rows. It also ships the 8-bit floating-point codec (E4M3 and E5M2)
//! used to quantize inference inputs and outputs.
//!
//! The crate is organized around the compile/evaluate split:
//!
//! - [`compile`]: ingestion schemas and the compiler that validates,
//!   reorders, and folds the ensemble description.
//! - [`repr`]: the compiled representation the evaluator walks.
//! - [`inference`]: batch prediction with aggregation, post-transforms, and
//!   classifier labels.
//! - [`float8`]: the E4M3/E5M2 codec and bulk quantize/dequantize kernels.
//! - [`data`]: the dense row-major input matrix type.

pub mod compile;
pub mod data;
pub mod float8;
pub mod inference;
pub mod repr;

pub(crate) mod utils;

pub use compile::{BuildError, FlatEnsemble, RecursiveEnsemble};
pub use data::{DataMatrix, RowMatrix};
pub use float8::{F8E4M3, F8E5M2};
pub use inference::{Classifier, EvalError, Prediction, Predictor};
pub use repr::{Aggregate, Forest, NodeMode, PostTransform, Threshold};
