//! Compiled ensemble representation.
//!
//! The compiler in [`crate::compile`] produces a [`Forest`]: a flat array of
//! fixed-size [`TreeNode`] records across all trees, a weights table for
//! multi-target leaves, and the evaluation configuration (aggregate,
//! post-transform, base values, hint flags).
//!
//! The layout invariant everything else relies on: **a branch's false child
//! is always the next node in the array**, so only the true-child link is
//! stored and the false branch is pointer arithmetic. The forest is frozen
//! after compilation; evaluation only reads.

mod forest;
mod node;
mod threshold;

pub use forest::{Aggregate, Forest, PostTransform, UnknownNameError};
pub use node::{NodeMode, SparseWeight, TreeNode};
pub use threshold::Threshold;

pub(crate) use node::MISSING_TRACK_TRUE;
