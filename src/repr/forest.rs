//! The compiled forest.

use serde::{Deserialize, Serialize};

use super::{SparseWeight, Threshold, TreeNode};

// =============================================================================
// Aggregate / PostTransform
// =============================================================================

/// An unrecognized spelling of an aggregate, post-transform, or node mode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{name}`")]
pub struct UnknownNameError {
    pub(crate) kind: &'static str,
    pub(crate) name: String,
}

/// How per-tree scores combine into one per-target score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregate {
    #[default]
    Sum,
    Average,
    Min,
    Max,
}

impl Aggregate {
    /// Decode the recursive schema's integer encoding.
    pub fn from_v5_int(v: i64) -> Option<Self> {
        match v {
            0 => Some(Aggregate::Average),
            1 => Some(Aggregate::Sum),
            2 => Some(Aggregate::Min),
            3 => Some(Aggregate::Max),
            _ => None,
        }
    }
}

impl std::str::FromStr for Aggregate {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, UnknownNameError> {
        match s {
            "SUM" => Ok(Aggregate::Sum),
            "AVERAGE" => Ok(Aggregate::Average),
            "MIN" => Ok(Aggregate::Min),
            "MAX" => Ok(Aggregate::Max),
            _ => Err(UnknownNameError {
                kind: "aggregate function",
                name: s.to_string(),
            }),
        }
    }
}

/// Function applied to the per-row score vector after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostTransform {
    #[default]
    None,
    Softmax,
    Logistic,
    SoftmaxZero,
    Probit,
}

impl PostTransform {
    /// Decode the recursive schema's integer encoding.
    pub fn from_v5_int(v: i64) -> Option<Self> {
        match v {
            0 => Some(PostTransform::None),
            1 => Some(PostTransform::Softmax),
            2 => Some(PostTransform::Logistic),
            3 => Some(PostTransform::SoftmaxZero),
            4 => Some(PostTransform::Probit),
            _ => None,
        }
    }
}

impl std::str::FromStr for PostTransform {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, UnknownNameError> {
        match s {
            "NONE" => Ok(PostTransform::None),
            "SOFTMAX" => Ok(PostTransform::Softmax),
            "LOGISTIC" => Ok(PostTransform::Logistic),
            "SOFTMAX_ZERO" => Ok(PostTransform::SoftmaxZero),
            "PROBIT" => Ok(PostTransform::Probit),
            _ => Err(UnknownNameError {
                kind: "post transform",
                name: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Forest
// =============================================================================

/// A compiled, immutable tree ensemble.
///
/// All state is produced by the compiler and only ever read afterwards, so a
/// forest can be shared freely across concurrent evaluations.
///
/// The node array holds every tree back to back in depth-first, false-first
/// order; each branch's false child sits at the next index, so nodes only
/// store their true-child link.
#[derive(Debug, Clone)]
pub struct Forest<T: Threshold> {
    /// All nodes of all trees, flattened.
    pub(crate) nodes: Box<[TreeNode<T>]>,
    /// Root index of each tree in `nodes`.
    pub(crate) roots: Box<[u32]>,
    /// Weight records for multi-target leaves.
    pub(crate) weights: Box<[SparseWeight<T>]>,
    /// Per-target additive bias applied before the post-transform; either
    /// `n_targets` long or empty.
    pub(crate) base_values: Box<[T]>,
    /// Outputs per row.
    pub(crate) n_targets: usize,
    /// Largest feature id any node tests; bounds input width.
    pub(crate) max_feature_id: usize,
    pub(crate) aggregate: Aggregate,
    pub(crate) post_transform: PostTransform,
    /// Every branch in the forest shares one split mode.
    pub(crate) same_mode: bool,
    /// At least one node routes missing values to its true branch.
    pub(crate) has_missing_tracks: bool,
    /// Two targets but only one referenced by weights: the evaluator derives
    /// the second score.
    pub(crate) binary_case: bool,
    /// No weight in the ensemble is negative.
    pub(crate) weights_all_positive: bool,
}

impl<T: Threshold> Forest<T> {
    /// Number of trees.
    #[inline]
    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    /// Number of output targets (classes for a classifier).
    #[inline]
    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    /// Largest feature id tested anywhere in the forest.
    #[inline]
    pub fn max_feature_id(&self) -> usize {
        self.max_feature_id
    }

    /// All compiled nodes, every tree back to back.
    #[inline]
    pub fn nodes(&self) -> &[TreeNode<T>] {
        &self.nodes
    }

    /// Root node index of each tree.
    #[inline]
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// The weights table.
    #[inline]
    pub fn weights(&self) -> &[SparseWeight<T>] {
        &self.weights
    }

    /// Per-target additive bias.
    #[inline]
    pub fn base_values(&self) -> &[T] {
        &self.base_values
    }

    /// The aggregation function.
    #[inline]
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// The post-transform.
    #[inline]
    pub fn post_transform(&self) -> PostTransform {
        self.post_transform
    }

    /// Whether every branch shares one split mode (enables the specialized
    /// walk loop).
    #[inline]
    pub fn same_mode(&self) -> bool {
        self.same_mode
    }

    /// Whether any node redirects missing values.
    #[inline]
    pub fn has_missing_tracks(&self) -> bool {
        self.has_missing_tracks
    }

    /// Classifier hint: single-logit two-class ensemble.
    #[inline]
    pub fn binary_case(&self) -> bool {
        self.binary_case
    }

    /// Classifier hint: every weight is non-negative.
    #[inline]
    pub fn weights_all_positive(&self) -> bool {
        self.weights_all_positive
    }
}
