//! Score accumulation and finalization.
//!
//! An [`Aggregator`] is the strategy object threaded through every
//! parallelization regime: it folds leaf contributions into per-row
//! accumulators, merges per-worker accumulators after a parallel phase, and
//! turns the final accumulator vector into output values (plus a label for
//! classifiers).
//!
//! Two method families exist because single-target evaluation is the hot
//! case: the `*1` variants work on one [`ScoreValue`] and read the leaf's
//! inline weight, never touching the weights table.

use crate::repr::{Forest, PostTransform, SparseWeight, Threshold, TreeNode};

use super::transform::{apply_transform, transform_scalar};

/// One accumulator slot. `has_score` distinguishes "no tree contributed yet"
/// from a genuine zero, which is what seeds MIN/MAX from the first
/// contribution.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScoreValue<T> {
    pub score: T,
    pub has_score: bool,
}

/// Strategy for accumulating, merging, and finalizing scores.
pub(crate) trait Aggregator<T: Threshold>: Sync {
    /// Per-row label output; `()` for regression, the winning class index
    /// for classification.
    type Label: Copy + Default + Send + Sync;

    fn process1(&self, score: &mut ScoreValue<T>, leaf: &TreeNode<T>);
    fn merge1(&self, dst: &mut ScoreValue<T>, src: &ScoreValue<T>);
    fn finalize1(&self, score: ScoreValue<T>, out: &mut T) -> Self::Label;

    fn process(&self, scores: &mut [ScoreValue<T>], leaf: &TreeNode<T>);
    fn merge(&self, dst: &mut [ScoreValue<T>], src: &[ScoreValue<T>]);
    fn finalize(&self, scores: &mut [ScoreValue<T>], out: &mut [T]) -> Self::Label;
}

#[inline]
fn base_value<T: Threshold>(forest: &Forest<T>, i: usize) -> T {
    forest.base_values.get(i).copied().unwrap_or_else(T::zero)
}

#[inline]
fn leaf_weights<'f, T: Threshold>(
    forest: &'f Forest<T>,
    leaf: &TreeNode<T>,
) -> &'f [SparseWeight<T>] {
    let base = leaf.weight_base() as usize;
    &forest.weights[base..base + leaf.n_weights() as usize]
}

// =============================================================================
// Sum / Average
// =============================================================================

pub(crate) struct SumAggregator<'f, T: Threshold> {
    forest: &'f Forest<T>,
}

impl<'f, T: Threshold> SumAggregator<'f, T> {
    pub fn new(forest: &'f Forest<T>) -> Self {
        Self { forest }
    }
}

impl<T: Threshold> Aggregator<T> for SumAggregator<'_, T> {
    type Label = ();

    #[inline]
    fn process1(&self, score: &mut ScoreValue<T>, leaf: &TreeNode<T>) {
        score.score = score.score + leaf.value;
        score.has_score = true;
    }

    #[inline]
    fn merge1(&self, dst: &mut ScoreValue<T>, src: &ScoreValue<T>) {
        dst.score = dst.score + src.score;
        dst.has_score |= src.has_score;
    }

    fn finalize1(&self, score: ScoreValue<T>, out: &mut T) {
        let val = if score.has_score {
            score.score + base_value(self.forest, 0)
        } else {
            base_value(self.forest, 0)
        };
        *out = transform_scalar(self.forest.post_transform, val);
    }

    #[inline]
    fn process(&self, scores: &mut [ScoreValue<T>], leaf: &TreeNode<T>) {
        for w in leaf_weights(self.forest, leaf) {
            let slot = &mut scores[w.target as usize];
            slot.score = slot.score + w.value;
            slot.has_score = true;
        }
    }

    #[inline]
    fn merge(&self, dst: &mut [ScoreValue<T>], src: &[ScoreValue<T>]) {
        for (d, s) in dst.iter_mut().zip(src) {
            self.merge1(d, s);
        }
    }

    fn finalize(&self, scores: &mut [ScoreValue<T>], out: &mut [T]) {
        for (i, (o, s)) in out.iter_mut().zip(scores.iter()).enumerate() {
            let val = if s.has_score { s.score } else { T::zero() };
            *o = val + base_value(self.forest, i);
        }
        apply_transform(self.forest.post_transform, out);
    }
}

pub(crate) struct AverageAggregator<'f, T: Threshold> {
    forest: &'f Forest<T>,
    n_trees: T,
}

impl<'f, T: Threshold> AverageAggregator<'f, T> {
    pub fn new(forest: &'f Forest<T>) -> Self {
        Self {
            forest,
            n_trees: T::from_f64(forest.n_trees() as f64),
        }
    }
}

impl<T: Threshold> Aggregator<T> for AverageAggregator<'_, T> {
    type Label = ();

    #[inline]
    fn process1(&self, score: &mut ScoreValue<T>, leaf: &TreeNode<T>) {
        score.score = score.score + leaf.value;
        score.has_score = true;
    }

    #[inline]
    fn merge1(&self, dst: &mut ScoreValue<T>, src: &ScoreValue<T>) {
        dst.score = dst.score + src.score;
        dst.has_score |= src.has_score;
    }

    fn finalize1(&self, score: ScoreValue<T>, out: &mut T) {
        let val = if score.has_score {
            score.score / self.n_trees + base_value(self.forest, 0)
        } else {
            base_value(self.forest, 0)
        };
        *out = transform_scalar(self.forest.post_transform, val);
    }

    #[inline]
    fn process(&self, scores: &mut [ScoreValue<T>], leaf: &TreeNode<T>) {
        for w in leaf_weights(self.forest, leaf) {
            let slot = &mut scores[w.target as usize];
            slot.score = slot.score + w.value;
            slot.has_score = true;
        }
    }

    #[inline]
    fn merge(&self, dst: &mut [ScoreValue<T>], src: &[ScoreValue<T>]) {
        for (d, s) in dst.iter_mut().zip(src) {
            self.merge1(d, s);
        }
    }

    fn finalize(&self, scores: &mut [ScoreValue<T>], out: &mut [T]) {
        for (i, (o, s)) in out.iter_mut().zip(scores.iter()).enumerate() {
            let val = if s.has_score {
                s.score / self.n_trees
            } else {
                T::zero()
            };
            *o = val + base_value(self.forest, i);
        }
        apply_transform(self.forest.post_transform, out);
    }
}

// =============================================================================
// Min / Max
// =============================================================================

macro_rules! extremum_aggregator {
    ($name:ident, $keeps:expr) => {
        pub(crate) struct $name<'f, T: Threshold> {
            forest: &'f Forest<T>,
        }

        impl<'f, T: Threshold> $name<'f, T> {
            pub fn new(forest: &'f Forest<T>) -> Self {
                Self { forest }
            }
        }

        impl<T: Threshold> Aggregator<T> for $name<'_, T> {
            type Label = ();

            #[inline]
            fn process1(&self, score: &mut ScoreValue<T>, leaf: &TreeNode<T>) {
                if !score.has_score || $keeps(leaf.value, score.score) {
                    score.score = leaf.value;
                }
                score.has_score = true;
            }

            #[inline]
            fn merge1(&self, dst: &mut ScoreValue<T>, src: &ScoreValue<T>) {
                if src.has_score {
                    if !dst.has_score || $keeps(src.score, dst.score) {
                        dst.score = src.score;
                    }
                    dst.has_score = true;
                }
            }

            fn finalize1(&self, score: ScoreValue<T>, out: &mut T) {
                let val = if score.has_score {
                    score.score + base_value(self.forest, 0)
                } else {
                    base_value(self.forest, 0)
                };
                *out = transform_scalar(self.forest.post_transform, val);
            }

            #[inline]
            fn process(&self, scores: &mut [ScoreValue<T>], leaf: &TreeNode<T>) {
                for w in leaf_weights(self.forest, leaf) {
                    let slot = &mut scores[w.target as usize];
                    if !slot.has_score || $keeps(w.value, slot.score) {
                        slot.score = w.value;
                    }
                    slot.has_score = true;
                }
            }

            #[inline]
            fn merge(&self, dst: &mut [ScoreValue<T>], src: &[ScoreValue<T>]) {
                for (d, s) in dst.iter_mut().zip(src) {
                    self.merge1(d, s);
                }
            }

            fn finalize(&self, scores: &mut [ScoreValue<T>], out: &mut [T]) {
                for (i, (o, s)) in out.iter_mut().zip(scores.iter()).enumerate() {
                    let val = if s.has_score { s.score } else { T::zero() };
                    *o = val + base_value(self.forest, i);
                }
                apply_transform(self.forest.post_transform, out);
            }
        }
    };
}

extremum_aggregator!(MinAggregator, |new: T, old: T| new < old);
extremum_aggregator!(MaxAggregator, |new: T, old: T| new > old);

// =============================================================================
// Classifier
// =============================================================================

/// Classifier aggregation: sums class-weight contributions, then derives the
/// missing score in the single-logit binary case and reports the winning
/// class index.
pub(crate) struct ClassifierAggregator<'f, T: Threshold> {
    forest: &'f Forest<T>,
}

impl<'f, T: Threshold> ClassifierAggregator<'f, T> {
    pub fn new(forest: &'f Forest<T>) -> Self {
        Self { forest }
    }

    /// Derive both scores of the two-class single-logit ensemble from the
    /// one accumulated score.
    ///
    /// With all-positive weights the score reads as a probability-like
    /// quantity and the second class gets its complement; with mixed-sign
    /// weights it reads as a logit and the second class gets its reflection.
    /// Element-wise transforms commute with reflection (σ(-z) = 1 - σ(z)),
    /// so both interpretations agree on the transformed outputs.
    fn finalize_binary(&self, raw: T, out: &mut [T]) {
        let post = self.forest.post_transform;
        match post {
            PostTransform::None => {
                out[1] = raw;
                out[0] = if self.forest.weights_all_positive {
                    T::one() - raw
                } else {
                    -raw
                };
            }
            PostTransform::Logistic | PostTransform::Probit => {
                let p = transform_scalar(post, raw);
                out[1] = p;
                out[0] = if self.forest.weights_all_positive {
                    T::one() - p
                } else {
                    transform_scalar(post, -raw)
                };
            }
            PostTransform::Softmax | PostTransform::SoftmaxZero => {
                out[1] = raw;
                out[0] = if self.forest.weights_all_positive {
                    T::one() - raw
                } else {
                    -raw
                };
                apply_transform(post, out);
            }
        }
    }
}

/// Index of the largest score; the first wins ties.
fn argmax<T: Threshold>(row: &[T]) -> i64 {
    let mut best = 0usize;
    for (i, v) in row.iter().enumerate().skip(1) {
        if *v > row[best] {
            best = i;
        }
    }
    best as i64
}

impl<T: Threshold> Aggregator<T> for ClassifierAggregator<'_, T> {
    type Label = i64;

    #[inline]
    fn process1(&self, score: &mut ScoreValue<T>, leaf: &TreeNode<T>) {
        score.score = score.score + leaf.value;
        score.has_score = true;
    }

    #[inline]
    fn merge1(&self, dst: &mut ScoreValue<T>, src: &ScoreValue<T>) {
        dst.score = dst.score + src.score;
        dst.has_score |= src.has_score;
    }

    fn finalize1(&self, score: ScoreValue<T>, out: &mut T) -> i64 {
        let val = if score.has_score {
            score.score + base_value(self.forest, 0)
        } else {
            base_value(self.forest, 0)
        };
        *out = transform_scalar(self.forest.post_transform, val);
        0
    }

    #[inline]
    fn process(&self, scores: &mut [ScoreValue<T>], leaf: &TreeNode<T>) {
        for w in leaf_weights(self.forest, leaf) {
            let slot = &mut scores[w.target as usize];
            slot.score = slot.score + w.value;
            slot.has_score = true;
        }
    }

    #[inline]
    fn merge(&self, dst: &mut [ScoreValue<T>], src: &[ScoreValue<T>]) {
        for (d, s) in dst.iter_mut().zip(src) {
            self.merge1(d, s);
        }
    }

    fn finalize(&self, scores: &mut [ScoreValue<T>], out: &mut [T]) -> i64 {
        if self.forest.binary_case && scores.len() == 2 {
            let slot = usize::from(!scores[0].has_score);
            let raw = scores[slot].score + base_value(self.forest, slot);
            self.finalize_binary(raw, out);
        } else {
            for (i, (o, s)) in out.iter_mut().zip(scores.iter()).enumerate() {
                let val = if s.has_score { s.score } else { T::zero() };
                *o = val + base_value(self.forest, i);
            }
            apply_transform(self.forest.post_transform, out);
        }
        argmax(out)
    }
}
