//! The recursive (v5-style) ensemble schema.
//!
//! This schema separates leaves from branch nodes: branch child links carry
//! a leaf/branch indicator, leaves live in their own `leaf_*` arrays, and
//! set-membership splits list their category values directly (one run per
//! `BRANCH_MEMBER` node, NaN-terminated) instead of chaining equality nodes.
//!
//! Normalization rewrites everything into the classic [`FlatEnsemble`]
//! layout: each membership node unrolls into a chain of single-value
//! equality nodes pointing their true branches at one shared subtree. The
//! compiler's categorical folding collapses the chain right back into a
//! bitmask node, so the round trip costs nothing at evaluation time.

use serde::{Deserialize, Serialize};

use crate::repr::{Aggregate, NodeMode, PostTransform, Threshold};

use super::{BuildError, FlatEnsemble};

/// A single tree unrolling past this many nodes means the node graph
/// references itself.
const MAX_UNROLLED_NODES: i64 = 1 << 24;

/// The recursive ensemble description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecursiveEnsemble<T> {
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub post_transform: PostTransform,
    /// Outputs per row.
    pub n_targets: usize,

    /// Entry node of each tree: an index into the node arrays, or into the
    /// leaf arrays for a single-leaf tree (flagged by equal true/false ids).
    pub tree_roots: Vec<i64>,
    /// Branch modes as bytes, `0 = BRANCH_LEQ` through `6 = BRANCH_MEMBER`.
    pub nodes_modes: Vec<u8>,
    pub nodes_featureids: Vec<i64>,
    pub nodes_splits: Vec<T>,
    pub nodes_truenodeids: Vec<i64>,
    /// Non-zero: the true child id indexes the leaf arrays.
    pub nodes_trueleafs: Vec<i64>,
    pub nodes_falsenodeids: Vec<i64>,
    /// Non-zero: the false child id indexes the leaf arrays.
    pub nodes_falseleafs: Vec<i64>,
    #[serde(default)]
    pub nodes_missing_value_tracks_true: Vec<i64>,
    /// Category values for `BRANCH_MEMBER` nodes, one NaN-terminated run per
    /// membership node in node order.
    #[serde(default)]
    pub membership_values: Vec<T>,

    pub leaf_targetids: Vec<i64>,
    pub leaf_weights: Vec<T>,
}

impl<T: Threshold> RecursiveEnsemble<T> {
    /// Normalize into the classic flat schema.
    pub fn to_flat(&self) -> Result<FlatEnsemble<T>, BuildError> {
        self.check_lengths()?;
        let membership = self.membership_by_node();

        let mut out = FlatEnsemble {
            aggregate: self.aggregate,
            post_transform: self.post_transform,
            n_targets: self.n_targets,
            ..Default::default()
        };

        for (tree, &root) in self.tree_roots.iter().enumerate() {
            let root_idx = usize::try_from(root).map_err(|_| BuildError::UnknownRoot(root))?;
            // A root with matching true/false ids denotes a tree that is a
            // single leaf; the id then points into the leaf arrays.
            let root_is_leaf = {
                let t = self.node_slot(root_idx, root)?;
                self.nodes_falsenodeids[t] == self.nodes_truenodeids[t]
                    && self.nodes_trueleafs[t] != 0
                    && self.nodes_falseleafs[t] != 0
            };
            if root_is_leaf {
                // For a single-leaf tree the root id doubles as the index
                // into the leaf arrays.
                self.unroll(
                    &mut out,
                    &membership,
                    self.leaf_slot(root)?,
                    tree as i64,
                    0,
                    0,
                    true,
                )?;
            } else {
                self.unroll(&mut out, &membership, root_idx, tree as i64, 0, 0, false)?;
            }
        }
        Ok(out)
    }

    /// Compile by way of the flat schema.
    pub fn compile(&self) -> Result<crate::repr::Forest<T>, BuildError> {
        self.to_flat()?.compile()
    }

    /// Emit the subtree at `curr` into the flat arrays, numbering nodes
    /// depth-first with the true branch first. Returns the last node id
    /// used.
    ///
    /// For a membership node, `member_idx` selects which of its category
    /// values this unrolled equality node tests; the "false child" of all
    /// but the last is the same node again with the next category.
    #[allow(clippy::too_many_arguments)]
    fn unroll(
        &self,
        out: &mut FlatEnsemble<T>,
        membership: &[Vec<T>],
        curr: usize,
        tree: i64,
        node_id: i64,
        member_idx: usize,
        is_leaf: bool,
    ) -> Result<i64, BuildError> {
        if node_id > MAX_UNROLLED_NODES {
            return Err(BuildError::Cycle {
                tree,
                node: node_id,
            });
        }
        out.nodes_treeids.push(tree);
        out.nodes_nodeids.push(node_id);

        if is_leaf {
            out.nodes_modes.push(NodeMode::Leaf);
            out.nodes_featureids.push(0);
            out.nodes_values.push(T::zero());
            out.nodes_truenodeids.push(0);
            out.nodes_falsenodeids.push(0);
            if !self.nodes_missing_value_tracks_true.is_empty() {
                out.nodes_missing_value_tracks_true.push(0);
            }
            out.target_treeids.push(tree);
            out.target_nodeids.push(node_id);
            out.target_ids.push(self.leaf_targetids[curr]);
            out.target_weights.push(self.leaf_weights[curr]);
            return Ok(node_id);
        }

        let mode = NodeMode::from_v5_byte(self.nodes_modes[curr])
            .ok_or(BuildError::UnknownNodeMode(self.nodes_modes[curr]))?;
        out.nodes_featureids.push(self.nodes_featureids[curr]);
        if !self.nodes_missing_value_tracks_true.is_empty() {
            out.nodes_missing_value_tracks_true
                .push(self.nodes_missing_value_tracks_true[curr]);
        }
        if mode == NodeMode::BranchMember {
            if membership[curr].is_empty() {
                return Err(BuildError::LengthMismatch {
                    name: "membership_values",
                    expected: 1,
                    got: 0,
                });
            }
            out.nodes_modes.push(NodeMode::BranchEq);
            out.nodes_values.push(membership[curr][member_idx]);
        } else {
            out.nodes_modes.push(mode);
            out.nodes_values.push(self.nodes_splits[curr]);
        }

        let false_slot = out.nodes_falsenodeids.len();
        out.nodes_falsenodeids.push(0);
        out.nodes_truenodeids.push(node_id + 1);

        let true_child = self.nodes_truenodeids[curr];
        let last = if self.nodes_trueleafs[curr] != 0 {
            self.unroll(
                out,
                membership,
                self.leaf_slot(true_child)?,
                tree,
                node_id + 1,
                0,
                true,
            )?
        } else {
            self.unroll(
                out,
                membership,
                self.node_slot(true_child as usize, true_child)?,
                tree,
                node_id + 1,
                0,
                false,
            )?
        };

        let false_id = last + 1;
        out.nodes_falsenodeids[false_slot] = false_id;

        let last = if mode == NodeMode::BranchMember && member_idx + 1 < membership[curr].len() {
            // More categories to test: the false branch re-enters this node
            // with the next membership value.
            self.unroll(out, membership, curr, tree, false_id, member_idx + 1, false)?
        } else {
            let false_child = self.nodes_falsenodeids[curr];
            if self.nodes_falseleafs[curr] != 0 {
                self.unroll(
                    out,
                    membership,
                    self.leaf_slot(false_child)?,
                    tree,
                    false_id,
                    0,
                    true,
                )?
            } else {
                self.unroll(
                    out,
                    membership,
                    self.node_slot(false_child as usize, false_child)?,
                    tree,
                    false_id,
                    0,
                    false,
                )?
            }
        };
        Ok(last)
    }

    /// Split the NaN-terminated membership runs out per node; non-membership
    /// nodes get an empty list.
    fn membership_by_node(&self) -> Vec<Vec<T>> {
        let mut by_node = Vec::with_capacity(self.nodes_modes.len());
        let mut cursor = 0usize;
        for &mode in &self.nodes_modes {
            let mut values = Vec::new();
            if mode == 6 {
                while cursor < self.membership_values.len()
                    && !self.membership_values[cursor].is_nan()
                {
                    values.push(self.membership_values[cursor]);
                    cursor += 1;
                }
                cursor += 1; // the NaN separator
            }
            by_node.push(values);
        }
        by_node
    }

    fn node_slot(&self, idx: usize, raw: i64) -> Result<usize, BuildError> {
        if idx < self.nodes_modes.len() {
            Ok(idx)
        } else {
            Err(BuildError::UnknownRoot(raw))
        }
    }

    fn leaf_slot(&self, raw: i64) -> Result<usize, BuildError> {
        usize::try_from(raw)
            .ok()
            .filter(|&i| i < self.leaf_weights.len())
            .ok_or(BuildError::UnknownRoot(raw))
    }

    fn check_lengths(&self) -> Result<(), BuildError> {
        let n = self.nodes_modes.len();
        let arrays = [
            ("nodes_featureids", self.nodes_featureids.len()),
            ("nodes_splits", self.nodes_splits.len()),
            ("nodes_truenodeids", self.nodes_truenodeids.len()),
            ("nodes_trueleafs", self.nodes_trueleafs.len()),
            ("nodes_falsenodeids", self.nodes_falsenodeids.len()),
            ("nodes_falseleafs", self.nodes_falseleafs.len()),
        ];
        for (name, got) in arrays {
            if got != n {
                return Err(BuildError::LengthMismatch {
                    name,
                    expected: n,
                    got,
                });
            }
        }
        let tracks = self.nodes_missing_value_tracks_true.len();
        if tracks != 0 && tracks != n {
            return Err(BuildError::LengthMismatch {
                name: "nodes_missing_value_tracks_true",
                expected: n,
                got: tracks,
            });
        }
        if self.leaf_targetids.len() != self.leaf_weights.len() {
            return Err(BuildError::LengthMismatch {
                name: "leaf_targetids",
                expected: self.leaf_weights.len(),
                got: self.leaf_targetids.len(),
            });
        }
        Ok(())
    }
}
