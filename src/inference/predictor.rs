//! Batch evaluation of a compiled forest.
//!
//! One of five execution regimes is chosen from the batch size `N`, the tree
//! count `T`, and the worker count `P`:
//!
//! | Regime | Condition                  | Strategy |
//! |--------|----------------------------|----------|
//! | A      | `N == 1`, `T <= Bt` or `P == 1` | serial walk over all trees |
//! | B      | `N == 1`, `T > Bt`         | trees in parallel, sequential merge |
//! | C      | `N > 1`, `N <= Br` or `P == 1` | serial, tree-major over row chunks |
//! | D      | `N > 1`, `T >= P`          | tree partitions per worker within each row chunk, parallel merge |
//! | E      | `N > 1`, `T < P`           | rows in parallel, serial tree walk per row |
//!
//! The chunking in C and D keeps the active row slab plus its accumulators
//! inside private cache while the inner loop runs tree-major over it.
//! Workers only ever write their own accumulator slab; merges happen after
//! the parallel phase joins, so no locks exist anywhere on the compute path.

use rayon::prelude::*;

use crate::data::{DataMatrix, FeatureValue};
use crate::repr::{Aggregate, Forest, NodeMode, Threshold, TreeNode};
use crate::utils::partition_work;

use super::aggregator::{
    Aggregator, AverageAggregator, MaxAggregator, MinAggregator, ScoreValue, SumAggregator,
};
use super::{EvalError, Prediction};

/// Tree count at or below which a single row stays serial (`Bt`).
pub const DEFAULT_TREE_PARALLEL_THRESHOLD: usize = 80;
/// Row count at or below which a batch stays serial (`Br`).
pub const DEFAULT_ROW_PARALLEL_THRESHOLD: usize = 50;
/// Rows per cache-sized chunk in the batched regimes (`Bb`).
pub const DEFAULT_ROW_CHUNK: usize = 128;

/// Evaluates a [`Forest`] over batches of rows.
///
/// The predictor borrows the forest and holds only the regime thresholds, so
/// it is cheap to construct and any number can share one forest.
#[derive(Debug, Clone)]
pub struct Predictor<'f, T: Threshold> {
    forest: &'f Forest<T>,
    tree_parallel_threshold: usize,
    row_parallel_threshold: usize,
    row_chunk: usize,
}

impl<'f, T: Threshold> Predictor<'f, T> {
    pub fn new(forest: &'f Forest<T>) -> Self {
        Self {
            forest,
            tree_parallel_threshold: DEFAULT_TREE_PARALLEL_THRESHOLD,
            row_parallel_threshold: DEFAULT_ROW_PARALLEL_THRESHOLD,
            row_chunk: DEFAULT_ROW_CHUNK,
        }
    }

    /// Override `Bt`, the tree count above which a single row parallelizes.
    pub fn with_tree_parallel_threshold(mut self, n: usize) -> Self {
        self.tree_parallel_threshold = n;
        self
    }

    /// Override `Br`, the row count above which a batch parallelizes.
    pub fn with_row_parallel_threshold(mut self, n: usize) -> Self {
        self.row_parallel_threshold = n;
        self
    }

    /// Override `Bb`, the rows per cache-sized chunk.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn with_row_chunk(mut self, n: usize) -> Self {
        assert!(n > 0, "row chunk must be non-empty");
        self.row_chunk = n;
        self
    }

    #[inline]
    pub fn forest(&self) -> &Forest<T> {
        self.forest
    }

    /// Evaluate a batch, producing one score row per input row.
    pub fn predict<M: DataMatrix>(&self, x: &M) -> Result<Prediction<T>, EvalError> {
        let mut out = Prediction::zeros(x.num_rows(), self.forest.n_targets());
        self.predict_into(x, out.as_mut_slice())?;
        Ok(out)
    }

    /// Evaluate a batch into a caller-provided buffer of
    /// `num_rows * n_targets` values.
    pub fn predict_into<M: DataMatrix>(&self, x: &M, out: &mut [T]) -> Result<(), EvalError> {
        match self.forest.aggregate() {
            Aggregate::Sum => self.run(x, &SumAggregator::new(self.forest), out)?,
            Aggregate::Average => self.run(x, &AverageAggregator::new(self.forest), out)?,
            Aggregate::Min => self.run(x, &MinAggregator::new(self.forest), out)?,
            Aggregate::Max => self.run(x, &MaxAggregator::new(self.forest), out)?,
        };
        Ok(())
    }

    /// Shared driver: validate, pick a regime, and run the aggregator over
    /// the batch. Returns the per-row labels the aggregator produced.
    pub(crate) fn run<M: DataMatrix, A: Aggregator<T>>(
        &self,
        x: &M,
        agg: &A,
        out: &mut [T],
    ) -> Result<Vec<A::Label>, EvalError> {
        let n_rows = x.num_rows();
        let n_targets = self.forest.n_targets();
        let width = x.num_features();
        let required = self.forest.max_feature_id() + 1;
        if width < required {
            return Err(EvalError::FeatureOutOfRange { required, width });
        }
        if out.len() != n_rows * n_targets {
            return Err(EvalError::OutputSize {
                expected: n_rows * n_targets,
                got: out.len(),
            });
        }

        let mut labels = vec![A::Label::default(); n_rows];
        if n_rows == 0 {
            return Ok(labels);
        }

        if n_targets == 1 {
            self.run_single_target(x, agg, out, &mut labels);
        } else {
            self.run_multi_target(x, agg, out, &mut labels);
        }
        Ok(labels)
    }

    fn run_single_target<M: DataMatrix, A: Aggregator<T>>(
        &self,
        x: &M,
        agg: &A,
        out: &mut [T],
        labels: &mut [A::Label],
    ) {
        let forest = self.forest;
        let roots = forest.roots();
        let n_rows = x.num_rows();
        let n_trees = roots.len();
        let n_threads = rayon::current_num_threads();

        if n_rows == 1 {
            let row = x.row(0);
            let mut score = ScoreValue::<T>::default();
            if n_trees <= self.tree_parallel_threshold || n_threads == 1 {
                // Regime A.
                for &root in roots {
                    agg.process1(&mut score, walk(forest, root, row));
                }
            } else {
                // Regime B: per-tree scores, merged in tree order.
                let scores: Vec<ScoreValue<T>> = roots
                    .par_iter()
                    .map(|&root| {
                        let mut s = ScoreValue::default();
                        agg.process1(&mut s, walk(forest, root, row));
                        s
                    })
                    .collect();
                for s in &scores {
                    agg.merge1(&mut score, s);
                }
            }
            labels[0] = agg.finalize1(score, &mut out[0]);
        } else if n_rows <= self.row_parallel_threshold || n_threads == 1 {
            // Regime C: tree-major over cache-sized row chunks.
            let mut scores = vec![ScoreValue::<T>::default(); self.row_chunk.min(n_rows)];
            for start in (0..n_rows).step_by(self.row_chunk) {
                let end = (start + self.row_chunk).min(n_rows);
                scores[..end - start].fill(ScoreValue::default());
                for &root in roots {
                    for i in start..end {
                        agg.process1(&mut scores[i - start], walk(forest, root, x.row(i)));
                    }
                }
                for i in start..end {
                    labels[i] = agg.finalize1(scores[i - start], &mut out[i]);
                }
            }
        } else if n_trees >= n_threads {
            // Regime D: each worker owns a tree partition and a full-length
            // accumulator slab; rows are still visited chunk by chunk.
            let n_workers = n_threads.min(n_trees);
            let mut scores = vec![ScoreValue::<T>::default(); n_workers * n_rows];
            let mut start = 0;
            while start < n_rows {
                let end = (start + self.row_chunk).min(n_rows);
                scores
                    .par_chunks_mut(n_rows)
                    .enumerate()
                    .for_each(|(w, slab)| {
                        for s in &mut slab[start..end] {
                            *s = ScoreValue::default();
                        }
                        for j in partition_work(w, n_workers, n_trees) {
                            for i in start..end {
                                agg.process1(&mut slab[i], walk(forest, roots[j], x.row(i)));
                            }
                        }
                    });
                start = end;
            }
            let (mine, others) = scores.split_at_mut(n_rows);
            let others = &*others;
            mine.par_iter_mut()
                .zip(out.par_iter_mut())
                .zip(labels.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((total, o), label))| {
                    for w in 1..n_workers {
                        agg.merge1(total, &others[(w - 1) * n_rows + i]);
                    }
                    *label = agg.finalize1(*total, o);
                });
        } else {
            // Regime E: one worker per row, full serial tree walk.
            out.par_iter_mut()
                .zip(labels.par_iter_mut())
                .enumerate()
                .for_each(|(i, (o, label))| {
                    let row = x.row(i);
                    let mut score = ScoreValue::<T>::default();
                    for &root in roots {
                        agg.process1(&mut score, walk(forest, root, row));
                    }
                    *label = agg.finalize1(score, o);
                });
        }
    }

    fn run_multi_target<M: DataMatrix, A: Aggregator<T>>(
        &self,
        x: &M,
        agg: &A,
        out: &mut [T],
        labels: &mut [A::Label],
    ) {
        let forest = self.forest;
        let roots = forest.roots();
        let n_rows = x.num_rows();
        let n_targets = forest.n_targets();
        let n_trees = roots.len();
        let n_threads = rayon::current_num_threads();

        if n_rows == 1 {
            let row = x.row(0);
            if n_trees <= self.tree_parallel_threshold || n_threads == 1 {
                // Regime A.
                let mut scores = vec![ScoreValue::<T>::default(); n_targets];
                for &root in roots {
                    agg.process(&mut scores, walk(forest, root, row));
                }
                labels[0] = agg.finalize(&mut scores, out);
            } else {
                // Regime B: per-worker score vectors over tree partitions.
                let n_workers = n_threads.min(n_trees);
                let mut scores = vec![ScoreValue::<T>::default(); n_workers * n_targets];
                scores
                    .par_chunks_mut(n_targets)
                    .enumerate()
                    .for_each(|(w, slab)| {
                        for j in partition_work(w, n_workers, n_trees) {
                            agg.process(slab, walk(forest, roots[j], row));
                        }
                    });
                let (mine, others) = scores.split_at_mut(n_targets);
                for w in 1..n_workers {
                    agg.merge(mine, &others[(w - 1) * n_targets..w * n_targets]);
                }
                labels[0] = agg.finalize(mine, out);
            }
        } else if n_rows <= self.row_parallel_threshold || n_threads == 1 {
            // Regime C.
            let chunk = self.row_chunk.min(n_rows);
            let mut scores = vec![ScoreValue::<T>::default(); chunk * n_targets];
            for start in (0..n_rows).step_by(self.row_chunk) {
                let end = (start + self.row_chunk).min(n_rows);
                scores[..(end - start) * n_targets].fill(ScoreValue::default());
                for &root in roots {
                    for i in start..end {
                        let slab = &mut scores[(i - start) * n_targets..][..n_targets];
                        agg.process(slab, walk(forest, root, x.row(i)));
                    }
                }
                for i in start..end {
                    let slab = &mut scores[(i - start) * n_targets..][..n_targets];
                    labels[i] = agg.finalize(slab, &mut out[i * n_targets..][..n_targets]);
                }
            }
        } else if n_trees >= n_threads {
            // Regime D.
            let n_workers = n_threads.min(n_trees);
            let slab_len = n_rows * n_targets;
            let mut scores = vec![ScoreValue::<T>::default(); n_workers * slab_len];
            let mut start = 0;
            while start < n_rows {
                let end = (start + self.row_chunk).min(n_rows);
                scores
                    .par_chunks_mut(slab_len)
                    .enumerate()
                    .for_each(|(w, slab)| {
                        for s in &mut slab[start * n_targets..end * n_targets] {
                            *s = ScoreValue::default();
                        }
                        for j in partition_work(w, n_workers, n_trees) {
                            for i in start..end {
                                let row_scores = &mut slab[i * n_targets..][..n_targets];
                                agg.process(row_scores, walk(forest, roots[j], x.row(i)));
                            }
                        }
                    });
                start = end;
            }
            let (mine, others) = scores.split_at_mut(slab_len);
            let others = &*others;
            mine.par_chunks_mut(n_targets)
                .zip(out.par_chunks_mut(n_targets))
                .zip(labels.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((total, o), label))| {
                    for w in 1..n_workers {
                        let src = &others[(w - 1) * slab_len + i * n_targets..][..n_targets];
                        agg.merge(total, src);
                    }
                    *label = agg.finalize(total, o);
                });
        } else {
            // Regime E: rows in parallel, a reusable score vector per split.
            out.par_chunks_mut(n_targets)
                .zip(labels.par_iter_mut())
                .enumerate()
                .for_each_with(
                    vec![ScoreValue::<T>::default(); n_targets],
                    |scores, (i, (o, label))| {
                        scores.fill(ScoreValue::default());
                        for &root in roots {
                            agg.process(scores, walk(forest, root, x.row(i)));
                        }
                        *label = agg.finalize(scores, o);
                    },
                );
        }
    }
}

// =============================================================================
// Tree walk
// =============================================================================

/// Walk from `root` to the leaf selected by `row`.
///
/// With a uniform split mode the comparator is hoisted out of the loop; both
/// shapes skip the NaN test entirely when no node in the forest tracks
/// missing values.
#[inline]
fn walk<'a, T: Threshold, S: FeatureValue>(
    forest: &'a Forest<T>,
    root: u32,
    row: &[S],
) -> &'a TreeNode<T> {
    let nodes = forest.nodes();
    let idx = root as usize;
    let tracks = forest.has_missing_tracks();
    if forest.same_mode() {
        match nodes[idx].mode() {
            NodeMode::Leaf => &nodes[idx],
            NodeMode::BranchLeq => walk_cmp(nodes, idx, row, tracks, |v, t| v <= t),
            NodeMode::BranchLt => walk_cmp(nodes, idx, row, tracks, |v, t| v < t),
            NodeMode::BranchGte => walk_cmp(nodes, idx, row, tracks, |v, t| v >= t),
            NodeMode::BranchGt => walk_cmp(nodes, idx, row, tracks, |v, t| v > t),
            NodeMode::BranchEq => walk_cmp(nodes, idx, row, tracks, |v, t| v == t),
            NodeMode::BranchNeq => walk_cmp(nodes, idx, row, tracks, |v, t| v != t),
            NodeMode::BranchMember => walk_member(nodes, idx, row, tracks),
        }
    } else {
        walk_mixed(nodes, idx, row, tracks)
    }
}

#[inline]
fn walk_cmp<'a, T: Threshold, S: FeatureValue>(
    nodes: &'a [TreeNode<T>],
    mut idx: usize,
    row: &[S],
    tracks: bool,
    cmp: impl Fn(f64, f64) -> bool,
) -> &'a TreeNode<T> {
    if tracks {
        loop {
            let node = &nodes[idx];
            if node.is_leaf() {
                return node;
            }
            let v = row[node.feature_id() as usize];
            idx = if cmp(v.to_f64(), node.value().to_f64())
                || (node.missing_goes_true() && v.is_missing())
            {
                node.true_child() as usize
            } else {
                idx + 1
            };
        }
    } else {
        loop {
            let node = &nodes[idx];
            if node.is_leaf() {
                return node;
            }
            let v = row[node.feature_id() as usize];
            idx = if cmp(v.to_f64(), node.value().to_f64()) {
                node.true_child() as usize
            } else {
                idx + 1
            };
        }
    }
}

#[inline]
fn walk_member<'a, T: Threshold, S: FeatureValue>(
    nodes: &'a [TreeNode<T>],
    mut idx: usize,
    row: &[S],
    tracks: bool,
) -> &'a TreeNode<T> {
    loop {
        let node = &nodes[idx];
        if node.is_leaf() {
            return node;
        }
        let v = row[node.feature_id() as usize];
        let take_true = node.value().mask_contains(v.to_f64())
            || (tracks && node.missing_goes_true() && v.is_missing());
        idx = if take_true {
            node.true_child() as usize
        } else {
            idx + 1
        };
    }
}

fn walk_mixed<'a, T: Threshold, S: FeatureValue>(
    nodes: &'a [TreeNode<T>],
    mut idx: usize,
    row: &[S],
    tracks: bool,
) -> &'a TreeNode<T> {
    loop {
        let node = &nodes[idx];
        let mode = node.mode();
        if mode == NodeMode::Leaf {
            return node;
        }
        let v = row[node.feature_id() as usize];
        let x = v.to_f64();
        let t = node.value().to_f64();
        let mut take_true = match mode {
            NodeMode::BranchLeq => x <= t,
            NodeMode::BranchLt => x < t,
            NodeMode::BranchGte => x >= t,
            NodeMode::BranchGt => x > t,
            NodeMode::BranchEq => x == t,
            NodeMode::BranchNeq => x != t,
            NodeMode::BranchMember => node.value().mask_contains(x),
            NodeMode::Leaf => unreachable!(),
        };
        if tracks && node.missing_goes_true() && v.is_missing() {
            take_true = true;
        }
        idx = if take_true {
            node.true_child() as usize
        } else {
            idx + 1
        };
    }
}
