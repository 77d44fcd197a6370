//! Compiled node records.

use serde::{Deserialize, Serialize};

use super::Threshold;

/// Bit set in [`TreeNode::flags`] when a missing input value takes the true
/// branch at this node.
pub(crate) const MISSING_TRACK_TRUE: u8 = 0x80;

/// Mask selecting the split mode out of [`TreeNode::flags`].
pub(crate) const MODE_MASK: u8 = 0x7F;

// =============================================================================
// NodeMode
// =============================================================================

/// Split mode of a node.
///
/// The serialized spellings follow the classic ensemble schema
/// (`"BRANCH_LEQ"`, `"LEAF"`, ...). The recursive schema encodes branch
/// modes as bytes instead; see [`NodeMode::from_v5_byte`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum NodeMode {
    Leaf = 0,
    BranchLeq = 1,
    BranchLt = 2,
    BranchGte = 3,
    BranchGt = 4,
    BranchEq = 5,
    BranchNeq = 6,
    BranchMember = 7,
}

impl NodeMode {
    /// Whether this mode is a branch (anything but a leaf).
    #[inline]
    pub fn is_branch(self) -> bool {
        self != NodeMode::Leaf
    }

    /// Decode the low bits of a compiled flags byte.
    #[inline]
    pub(crate) fn from_flags(flags: u8) -> Self {
        match flags & MODE_MASK {
            0 => NodeMode::Leaf,
            1 => NodeMode::BranchLeq,
            2 => NodeMode::BranchLt,
            3 => NodeMode::BranchGte,
            4 => NodeMode::BranchGt,
            5 => NodeMode::BranchEq,
            6 => NodeMode::BranchNeq,
            7 => NodeMode::BranchMember,
            other => unreachable!("invalid node mode bits {other}"),
        }
    }

    /// Decode a branch mode from the recursive schema's byte encoding
    /// (`0 = BRANCH_LEQ` through `6 = BRANCH_MEMBER`; leaves are flagged
    /// out-of-band there).
    pub fn from_v5_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(NodeMode::BranchLeq),
            1 => Some(NodeMode::BranchLt),
            2 => Some(NodeMode::BranchGte),
            3 => Some(NodeMode::BranchGt),
            4 => Some(NodeMode::BranchEq),
            5 => Some(NodeMode::BranchNeq),
            6 => Some(NodeMode::BranchMember),
            _ => None,
        }
    }
}

impl std::str::FromStr for NodeMode {
    type Err = super::UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEAF" => Ok(NodeMode::Leaf),
            "BRANCH_LEQ" => Ok(NodeMode::BranchLeq),
            "BRANCH_LT" => Ok(NodeMode::BranchLt),
            "BRANCH_GTE" => Ok(NodeMode::BranchGte),
            "BRANCH_GT" => Ok(NodeMode::BranchGt),
            "BRANCH_EQ" => Ok(NodeMode::BranchEq),
            "BRANCH_NEQ" => Ok(NodeMode::BranchNeq),
            "BRANCH_MEMBER" => Ok(NodeMode::BranchMember),
            _ => Err(super::UnknownNameError {
                kind: "node mode",
                name: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// TreeNode
// =============================================================================

/// One compiled node.
///
/// The record is mode-dependent:
///
/// - Branches store the split `value` (a threshold, or a category bitmask
///   for `BranchMember`) and the index of the true child. The false child is
///   never stored: the compiler lays nodes out so it is always at
///   `self_index + 1`.
/// - Leaves reuse `true_child` as the base index into the forest weights
///   table and `n_weights` as the span length; a single-target leaf also
///   carries its weight inline in `value` so the table is not touched on the
///   hot path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeNode<T> {
    pub(crate) value: T,
    pub(crate) true_child: u32,
    pub(crate) n_weights: u32,
    pub(crate) feature_id: u32,
    pub(crate) flags: u8,
}

impl<T: Threshold> TreeNode<T> {
    /// The split mode.
    #[inline]
    pub fn mode(&self) -> NodeMode {
        NodeMode::from_flags(self.flags)
    }

    /// Whether this node is a leaf.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags & MODE_MASK == NodeMode::Leaf as u8
    }

    /// Whether missing input values take the true branch here.
    #[inline]
    pub fn missing_goes_true(&self) -> bool {
        self.flags & MISSING_TRACK_TRUE != 0
    }

    /// Input column tested by this node (meaningless for leaves).
    #[inline]
    pub fn feature_id(&self) -> u32 {
        self.feature_id
    }

    /// Threshold, membership bitmask, or inline leaf weight.
    #[inline]
    pub fn value(&self) -> T {
        self.value
    }

    /// True-branch child index (branches only).
    #[inline]
    pub fn true_child(&self) -> u32 {
        self.true_child
    }

    /// Number of weight records owned by this leaf.
    #[inline]
    pub fn n_weights(&self) -> u32 {
        self.n_weights
    }

    /// Base index of this leaf's weight records in the forest table.
    #[inline]
    pub fn weight_base(&self) -> u32 {
        self.true_child
    }
}

// =============================================================================
// SparseWeight
// =============================================================================

/// One weights-table record: a leaf's contribution to one output target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseWeight<T> {
    /// Output slot (target or class index) this weight contributes to.
    pub target: u32,
    /// The contribution.
    pub value: T,
}
