//! Classification on top of the shared evaluator.
//!
//! A classifier is a forest whose targets are class slots, plus a label
//! table. Scores flow through the same regimes as regression; the
//! classifier aggregator additionally reports each row's winning class
//! index, which is then mapped through the label table. String labels go
//! through an intermediate integer buffer, exactly like the integer case,
//! and are materialized last.

use crate::data::DataMatrix;
use crate::repr::{Forest, Threshold};

use super::aggregator::ClassifierAggregator;
use super::{EvalError, Prediction, Predictor};

/// The configured class labels of a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassLabels {
    Int64(Vec<i64>),
    Strings(Vec<String>),
}

impl ClassLabels {
    /// Number of classes.
    pub fn len(&self) -> usize {
        match self {
            ClassLabels::Int64(v) => v.len(),
            ClassLabels::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-row predicted labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Labels {
    Int64(Vec<i64>),
    Strings(Vec<String>),
}

/// Evaluates a forest as a classifier: scores plus winning labels.
#[derive(Debug, Clone)]
pub struct Classifier<'f, T: Threshold> {
    predictor: Predictor<'f, T>,
    labels: ClassLabels,
}

impl<'f, T: Threshold> Classifier<'f, T> {
    /// Wrap a compiled forest with its label table. The table length must
    /// match the forest's target count.
    pub fn new(forest: &'f Forest<T>, labels: ClassLabels) -> Result<Self, EvalError> {
        if labels.len() != forest.n_targets() {
            return Err(EvalError::LabelCount {
                expected: forest.n_targets(),
                got: labels.len(),
            });
        }
        Ok(Self {
            predictor: Predictor::new(forest),
            labels,
        })
    }

    /// Override `Bt`; see [`Predictor::with_tree_parallel_threshold`].
    pub fn with_tree_parallel_threshold(mut self, n: usize) -> Self {
        self.predictor = self.predictor.with_tree_parallel_threshold(n);
        self
    }

    /// Override `Br`; see [`Predictor::with_row_parallel_threshold`].
    pub fn with_row_parallel_threshold(mut self, n: usize) -> Self {
        self.predictor = self.predictor.with_row_parallel_threshold(n);
        self
    }

    /// Override `Bb`; see [`Predictor::with_row_chunk`].
    pub fn with_row_chunk(mut self, n: usize) -> Self {
        self.predictor = self.predictor.with_row_chunk(n);
        self
    }

    #[inline]
    pub fn forest(&self) -> &Forest<T> {
        self.predictor.forest()
    }

    #[inline]
    pub fn class_labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Evaluate a batch: per-class scores and one label per row.
    pub fn predict<M: DataMatrix>(&self, x: &M) -> Result<(Prediction<T>, Labels), EvalError> {
        let forest = self.predictor.forest();
        let mut scores = Prediction::zeros(x.num_rows(), forest.n_targets());
        let agg = ClassifierAggregator::new(forest);
        let winners = self.predictor.run(x, &agg, scores.as_mut_slice())?;

        let labels = match &self.labels {
            ClassLabels::Int64(table) => {
                Labels::Int64(winners.iter().map(|&i| table[i as usize]).collect())
            }
            ClassLabels::Strings(table) => {
                Labels::Strings(winners.iter().map(|&i| table[i as usize].clone()).collect())
            }
        };
        Ok((scores, labels))
    }
}
