//! Ensemble ingestion and compilation.
//!
//! Two input schemas are accepted:
//!
//! - [`FlatEnsemble`]: the classic parallel-array description, one entry per
//!   node keyed by `(tree id, node id)`, with target weights keyed the same
//!   way.
//! - [`RecursiveEnsemble`]: the newer schema with per-tree roots, separate
//!   leaf arrays, and explicit membership-value lists. It normalizes into
//!   the flat schema (see [`v5`]) and compiles through the same path.
//!
//! Compilation validates the topology, lays nodes out in depth-first
//! false-first order (making every false child implicit at `self + 1`),
//! folds equality chains on one feature into bitmask-membership nodes, and
//! binds target weights to their leaves. Any structural defect aborts the
//! build with the offending tree/node ids; there is no partial forest.

mod v5;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::repr::{
    Aggregate, Forest, NodeMode, PostTransform, SparseWeight, Threshold, TreeNode,
    MISSING_TRACK_TRUE,
};

pub use v5::RecursiveEnsemble;

// =============================================================================
// BuildError
// =============================================================================

/// A defect in the ensemble description, detected at compile time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("ensemble declares no output targets")]
    NoTargets,
    #[error("array `{name}` has {got} entries, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("node {node} in tree {tree} is defined twice")]
    DuplicateNode { tree: i64, node: i64 },
    #[error("tree {tree}: node {node} references unknown {branch} child {child}")]
    UnknownChild {
        tree: i64,
        node: i64,
        branch: &'static str,
        child: i64,
    },
    #[error("tree {tree}: node {node} points to itself")]
    SelfLoop { tree: i64, node: i64 },
    #[error("tree {tree}: node {node} closes a cycle")]
    Cycle { tree: i64, node: i64 },
    #[error("tree {tree}: branch node {node} has negative feature id {feature}")]
    InvalidFeatureId { tree: i64, node: i64, feature: i64 },
    #[error("target id {id} is out of range for {n_targets} targets")]
    TargetOutOfRange { id: i64, n_targets: usize },
    #[error("unknown node mode byte {0}")]
    UnknownNodeMode(u8),
    #[error("tree root {0} is out of range")]
    UnknownRoot(i64),
    #[error(transparent)]
    UnknownName(#[from] crate::repr::UnknownNameError),
}

// =============================================================================
// FlatEnsemble
// =============================================================================

/// The classic flat ensemble description: parallel arrays over all nodes of
/// all trees, plus the target weights keyed by `(tree id, node id)`.
///
/// `T` is the threshold storage type (`f32` or `f64`); it bounds how many
/// categories a folded membership mask can hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatEnsemble<T> {
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default)]
    pub post_transform: PostTransform,
    /// Outputs per row (class count for a classifier).
    pub n_targets: usize,
    /// Per-target additive bias; empty or `n_targets` long.
    #[serde(default)]
    pub base_values: Vec<T>,

    pub nodes_treeids: Vec<i64>,
    pub nodes_nodeids: Vec<i64>,
    pub nodes_featureids: Vec<i64>,
    pub nodes_modes: Vec<NodeMode>,
    pub nodes_values: Vec<T>,
    pub nodes_truenodeids: Vec<i64>,
    pub nodes_falsenodeids: Vec<i64>,
    /// Empty, or one entry per node: non-zero routes missing values to the
    /// true branch.
    #[serde(default)]
    pub nodes_missing_value_tracks_true: Vec<i64>,

    pub target_treeids: Vec<i64>,
    pub target_nodeids: Vec<i64>,
    pub target_ids: Vec<i64>,
    pub target_weights: Vec<T>,
}

impl<T: Threshold> FlatEnsemble<T> {
    /// Compile into an immutable [`Forest`].
    pub fn compile(&self) -> Result<Forest<T>, BuildError> {
        if self.n_targets == 0 {
            return Err(BuildError::NoTargets);
        }
        self.check_lengths()?;

        let n = self.nodes_treeids.len();

        // Key every node by (tree, node); duplicates are structural defects.
        let mut by_id: HashMap<(i64, i64), usize> = HashMap::with_capacity(n);
        for i in 0..n {
            let key = (self.nodes_treeids[i], self.nodes_nodeids[i]);
            if by_id.insert(key, i).is_some() {
                return Err(BuildError::DuplicateNode {
                    tree: key.0,
                    node: key.1,
                });
            }
        }

        // Resolve child references to flat indices within the same tree.
        let mut true_ids = vec![0usize; n];
        let mut false_ids = vec![0usize; n];
        for i in 0..n {
            if !self.nodes_modes[i].is_branch() {
                continue;
            }
            let tree = self.nodes_treeids[i];
            let node = self.nodes_nodeids[i];
            for (branch, child, slot) in [
                ("true", self.nodes_truenodeids[i], &mut true_ids[i]),
                ("false", self.nodes_falsenodeids[i], &mut false_ids[i]),
            ] {
                let idx = *by_id.get(&(tree, child)).ok_or(BuildError::UnknownChild {
                    tree,
                    node,
                    branch,
                    child,
                })?;
                if idx == i {
                    return Err(BuildError::SelfLoop { tree, node });
                }
                *slot = idx;
            }
        }

        // Target weights sorted by (tree, node) so a leaf's records land
        // contiguously and subtree comparison can binary-search them.
        let mut target_order: Vec<u32> = (0..self.target_nodeids.len() as u32).collect();
        target_order.sort_by_key(|&ti| {
            (
                self.target_treeids[ti as usize],
                self.target_nodeids[ti as usize],
            )
        });

        let mut emit = Emit {
            ensemble: self,
            true_ids: &true_ids,
            false_ids: &false_ids,
            target_order: &target_order,
            mapping: vec![None; n],
            nodes: Vec::with_capacity(n),
            max_feature_id: 0,
        };

        // Emit one tree per distinct tree id; the first node seen for a tree
        // is its root.
        let mut roots = Vec::new();
        let mut seen_trees = std::collections::HashSet::new();
        for i in 0..n {
            let tree = self.nodes_treeids[i];
            if seen_trees.insert(tree) {
                roots.push(emit.add_nodes(i, tree)?);
            }
        }

        let Emit {
            mapping,
            mut nodes,
            max_feature_id,
            ..
        } = emit;

        // Bind weights to their leaves. The first weight of a leaf is
        // inlined; all of them go to the table as a contiguous span.
        let mut weights: Vec<SparseWeight<T>> = Vec::with_capacity(target_order.len());
        for &ti in &target_order {
            let ti = ti as usize;
            let id = self.target_ids[ti];
            if id < 0 || id as usize >= self.n_targets {
                return Err(BuildError::TargetOutOfRange {
                    id,
                    n_targets: self.n_targets,
                });
            }
            let key = (self.target_treeids[ti], self.target_nodeids[ti]);
            let flat = *by_id.get(&key).ok_or(BuildError::UnknownChild {
                tree: key.0,
                node: key.1,
                branch: "weight",
                child: key.1,
            })?;
            // Weights aimed at branches (or at nodes a fold absorbed) come
            // from legacy converters; they are dropped.
            let Some(pos) = mapping[flat] else { continue };
            let leaf = &mut nodes[pos as usize];
            if !leaf.is_leaf() {
                continue;
            }
            let w = SparseWeight {
                target: id as u32,
                value: self.target_weights[ti],
            };
            if leaf.n_weights == 0 {
                leaf.true_child = weights.len() as u32;
                leaf.value = w.value;
            }
            leaf.n_weights += 1;
            weights.push(w);
        }

        // Hint flags, computed over the compiled array so folding is
        // reflected.
        let mut same_mode = true;
        let mut first_mode = None;
        let mut has_missing_tracks = false;
        for node in &nodes {
            if node.missing_goes_true() {
                has_missing_tracks = true;
            }
            if node.is_leaf() {
                continue;
            }
            match first_mode {
                None => first_mode = Some(node.mode()),
                Some(m) if m != node.mode() => same_mode = false,
                Some(_) => {}
            }
        }

        let mut distinct_targets = 0usize;
        let mut weights_all_positive = true;
        let mut seen: Vec<bool> = vec![false; self.n_targets];
        for &ti in &target_order {
            let ti = ti as usize;
            let id = self.target_ids[ti] as usize;
            if !seen[id] {
                seen[id] = true;
                distinct_targets += 1;
            }
            if self.target_weights[ti] < T::zero() {
                weights_all_positive = false;
            }
        }
        let binary_case = self.n_targets == 2 && distinct_targets == 1;

        Ok(Forest {
            nodes: nodes.into_boxed_slice(),
            roots: roots.into_boxed_slice(),
            weights: weights.into_boxed_slice(),
            base_values: self.base_values.clone().into_boxed_slice(),
            n_targets: self.n_targets,
            max_feature_id,
            aggregate: self.aggregate,
            post_transform: self.post_transform,
            same_mode,
            has_missing_tracks,
            binary_case,
            weights_all_positive,
        })
    }

    fn check_lengths(&self) -> Result<(), BuildError> {
        let n = self.nodes_treeids.len();
        let node_arrays = [
            ("nodes_nodeids", self.nodes_nodeids.len()),
            ("nodes_featureids", self.nodes_featureids.len()),
            ("nodes_modes", self.nodes_modes.len()),
            ("nodes_values", self.nodes_values.len()),
            ("nodes_truenodeids", self.nodes_truenodeids.len()),
            ("nodes_falsenodeids", self.nodes_falsenodeids.len()),
        ];
        for (name, got) in node_arrays {
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
        let t = self.target_treeids.len();
        let target_arrays = [
            ("target_nodeids", self.target_nodeids.len()),
            ("target_ids", self.target_ids.len()),
            ("target_weights", self.target_weights.len()),
        ];
        for (name, got) in target_arrays {
            if got != t {
                return Err(BuildError::LengthMismatch {
                    name,
                    expected: t,
                    got,
                });
            }
        }
        if !self.base_values.is_empty() && self.base_values.len() != self.n_targets {
            return Err(BuildError::LengthMismatch {
                name: "base_values",
                expected: self.n_targets,
                got: self.base_values.len(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Emission (reordering + categorical folding)
// =============================================================================

struct Emit<'a, T: Threshold> {
    ensemble: &'a FlatEnsemble<T>,
    true_ids: &'a [usize],
    false_ids: &'a [usize],
    /// Target indices sorted by (tree, node).
    target_order: &'a [u32],
    /// Input position → compiled position, once emitted.
    mapping: Vec<Option<u32>>,
    nodes: Vec<TreeNode<T>>,
    max_feature_id: usize,
}

impl<T: Threshold> Emit<'_, T> {
    /// Emit the subtree rooted at input position `i`, false branch first, so
    /// the false child of every branch lands at the next array slot.
    ///
    /// Returns the compiled position of the subtree root. An already-emitted
    /// node is returned as-is: that is how the equality-chain pseudo-cycle
    /// (many true branches aimed at one shared subtree) resolves after
    /// folding.
    fn add_nodes(&mut self, i: usize, tree: i64) -> Result<u32, BuildError> {
        if let Some(pos) = self.mapping[i] {
            return Ok(pos);
        }
        let ens = self.ensemble;
        let pos = self.nodes.len() as u32;
        self.mapping[i] = Some(pos);

        let mode = ens.nodes_modes[i];
        let mut flags = mode as u8;
        let mut value = ens.nodes_values[i];
        let mut feature_id = 0u32;
        if mode.is_branch() {
            let feature = ens.nodes_featureids[i];
            if feature < 0 {
                return Err(BuildError::InvalidFeatureId {
                    tree,
                    node: ens.nodes_nodeids[i],
                    feature,
                });
            }
            feature_id = feature as u32;
            self.max_feature_id = self.max_feature_id.max(feature as usize);
            // An equality split on a small integral category is stored as a
            // one-bit membership mask; the chain fold below may widen it.
            if mode == NodeMode::BranchEq && T::maskable(value.to_f64()) {
                flags = NodeMode::BranchMember as u8;
                value = T::zero().mask_insert(value.to_f64());
            }
        }
        if self
            .ensemble
            .nodes_missing_value_tracks_true
            .get(i)
            .is_some_and(|&m| m != 0)
        {
            flags |= MISSING_TRACK_TRUE;
        }
        self.nodes.push(TreeNode {
            value,
            true_child: 0,
            n_weights: 0,
            feature_id,
            flags,
        });

        if !mode.is_branch() {
            return Ok(pos);
        }

        // Fold a chain of equality tests along the false branch: same
        // feature, maskable threshold, structurally identical true subtree.
        let mut false_i = self.false_ids[i];
        if self.nodes[pos as usize].mode() == NodeMode::BranchMember {
            while ens.nodes_modes[false_i] == NodeMode::BranchEq
                && ens.nodes_featureids[false_i] == ens.nodes_featureids[i]
                && T::maskable(ens.nodes_values[false_i].to_f64())
                && self.subtrees_equal(self.true_ids[i], self.true_ids[false_i])
            {
                let widened = self.nodes[pos as usize]
                    .value
                    .mask_insert(ens.nodes_values[false_i].to_f64());
                self.nodes[pos as usize].value = widened;
                false_i = self.false_ids[false_i];
            }
        }

        let false_pos = self.add_nodes(false_i, tree)?;
        if false_pos != pos + 1 {
            // A false branch can only revisit an emitted node if the graph
            // loops back on itself.
            return Err(BuildError::Cycle {
                tree,
                node: ens.nodes_nodeids[i],
            });
        }
        let true_pos = self.add_nodes(self.true_ids[i], tree)?;
        self.nodes[pos as usize].true_child = true_pos;
        Ok(pos)
    }

    /// Recursive structural equality: mode, feature, threshold at every
    /// node, and the first bound weight at leaves.
    fn subtrees_equal(&self, l: usize, r: usize) -> bool {
        let ens = self.ensemble;
        if ens.nodes_modes[l] != ens.nodes_modes[r]
            || ens.nodes_featureids[l] != ens.nodes_featureids[r]
            || ens.nodes_values[l] != ens.nodes_values[r]
        {
            return false;
        }
        if ens.nodes_modes[l] == NodeMode::Leaf {
            return self.first_weight(l) == self.first_weight(r);
        }
        self.subtrees_equal(self.false_ids[l], self.false_ids[r])
            && self.subtrees_equal(self.true_ids[l], self.true_ids[r])
    }

    /// First weight bound to the node at input position `flat`, if any.
    fn first_weight(&self, flat: usize) -> Option<T> {
        let ens = self.ensemble;
        let key = (ens.nodes_treeids[flat], ens.nodes_nodeids[flat]);
        let at = self.target_order.partition_point(|&ti| {
            (
                ens.target_treeids[ti as usize],
                ens.target_nodeids[ti as usize],
            ) < key
        });
        let &ti = self.target_order.get(at)?;
        let ti = ti as usize;
        if (ens.target_treeids[ti], ens.target_nodeids[ti]) == key {
            Some(ens.target_weights[ti])
        } else {
            None
        }
    }
}
