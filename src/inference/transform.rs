//! Post-transforms applied to aggregated score vectors.
//!
//! All math runs in `f64` and narrows back to the accumulator type at the
//! end; `f64` widens both accumulator types exactly, so the narrower type
//! loses nothing it ever had.

use crate::repr::{PostTransform, Threshold};

/// Entries closer to zero than this count as zero for `SOFTMAX_ZERO`.
const ZERO_EPS: f64 = 1e-7;

/// Apply a post-transform to one row of scores in place.
pub(crate) fn apply_transform<T: Threshold>(post: PostTransform, row: &mut [T]) {
    match post {
        PostTransform::None => {}
        PostTransform::Logistic => {
            for v in row.iter_mut() {
                *v = T::from_f64(logistic(v.to_f64()));
            }
        }
        PostTransform::Softmax => softmax_in_place(row),
        PostTransform::SoftmaxZero => softmax_zero_in_place(row),
        PostTransform::Probit => {
            for v in row.iter_mut() {
                *v = T::from_f64(probit(v.to_f64()));
            }
        }
    }
}

/// Scalar form for single-target rows. Softmax over a singleton is 1; the
/// zero-skipping variant keeps a zero score at zero.
pub(crate) fn transform_scalar<T: Threshold>(post: PostTransform, v: T) -> T {
    match post {
        PostTransform::None => v,
        PostTransform::Logistic => T::from_f64(logistic(v.to_f64())),
        PostTransform::Softmax => T::one(),
        PostTransform::SoftmaxZero => {
            if v.to_f64().abs() <= ZERO_EPS {
                v
            } else {
                T::one()
            }
        }
        PostTransform::Probit => T::from_f64(probit(v.to_f64())),
    }
}

/// Numerically stable softmax.
fn softmax_in_place<T: Threshold>(row: &mut [T]) {
    if row.is_empty() {
        return;
    }
    let max = row
        .iter()
        .map(|v| v.to_f64())
        .fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        let e = (v.to_f64() - max).exp();
        sum += e;
        *v = T::from_f64(e);
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v = T::from_f64(v.to_f64() / sum);
        }
    }
}

/// Softmax over the non-zero entries only; zero entries stay exactly zero.
/// An all-zero row stays all-zero.
fn softmax_zero_in_place<T: Threshold>(row: &mut [T]) {
    if row.is_empty() {
        return;
    }
    let max = row
        .iter()
        .map(|v| v.to_f64())
        .fold(f64::NEG_INFINITY, f64::max);
    let exp_neg_max = (-max).exp();
    let mut sum = 0.0;
    for v in row.iter_mut() {
        let x = v.to_f64();
        if x.abs() > ZERO_EPS {
            let e = (x - max).exp();
            sum += e;
            *v = T::from_f64(e);
        } else {
            *v = T::from_f64(x * exp_neg_max);
        }
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v = T::from_f64(v.to_f64() / sum);
        }
    }
}

/// The standard logistic sigmoid.
#[inline]
pub(crate) fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse standard-normal CDF.
#[inline]
pub(crate) fn probit(p: f64) -> f64 {
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Inverse error function, Giles' polynomial approximation (two branches on
/// `w = -ln(1 - x^2)`). Good to ~6 decimal digits over (-1, 1), which is
/// plenty for a probit output layer.
fn erf_inv(x: f64) -> f64 {
    let w = -((1.0 - x) * (1.0 + x)).ln();
    let p = if w < 5.0 {
        let w = w - 2.5;
        let mut p = 2.810_226_36e-08;
        p = 3.432_739_39e-07 + p * w;
        p = -3.523_387_7e-06 + p * w;
        p = -4.391_506_54e-06 + p * w;
        p = 2.185_808_7e-04 + p * w;
        p = -1.253_725_03e-03 + p * w;
        p = -4.177_681_64e-03 + p * w;
        p = 2.466_407_27e-01 + p * w;
        1.501_409_41 + p * w
    } else {
        let w = w.sqrt() - 3.0;
        let mut p = -2.002_142_57e-04;
        p = 1.009_505_58e-04 + p * w;
        p = 1.349_343_22e-03 + p * w;
        p = -3.673_428_44e-03 + p * w;
        p = 5.739_507_73e-03 + p * w;
        p = -7.622_461_3e-03 + p * w;
        p = 9.438_870_47e-03 + p * w;
        p = 1.001_674_06 + p * w;
        2.832_976_82 + p * w
    };
    p * x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn logistic_midpoint_and_symmetry() {
        assert_abs_diff_eq!(logistic(0.0), 0.5);
        assert_abs_diff_eq!(logistic(2.0) + logistic(-2.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(logistic(2.0), 0.880_797, epsilon = 1e-6);
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut row = [1.0f32, 2.0, 3.0];
        apply_transform(PostTransform::Softmax, &mut row);
        let sum: f32 = row.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(row[2] > row[1] && row[1] > row[0]);
    }

    #[test]
    fn softmax_is_stable_for_large_scores() {
        let mut row = [1000.0f32, 1001.0, 1002.0];
        apply_transform(PostTransform::Softmax, &mut row);
        let sum: f32 = row.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn softmax_zero_keeps_zero_entries() {
        let mut row = [2.0f64, 0.0, 1.0];
        apply_transform(PostTransform::SoftmaxZero, &mut row);
        assert_eq!(row[1], 0.0);
        let sum: f64 = row.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
        // Relative order of the non-zero entries is preserved.
        assert!(row[0] > row[2]);
    }

    #[test]
    fn softmax_zero_all_zero_row_stays_zero() {
        let mut row = [0.0f64, 0.0, 0.0];
        apply_transform(PostTransform::SoftmaxZero, &mut row);
        assert_eq!(row, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn probit_matches_known_quantiles() {
        assert_abs_diff_eq!(probit(0.5), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(probit(0.975), 1.959_964, epsilon = 1e-4);
        assert_abs_diff_eq!(probit(0.025), -1.959_964, epsilon = 1e-4);
        assert_abs_diff_eq!(probit(0.8413447), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn erf_inv_far_tail_uses_second_branch() {
        // p = 0.9999997 lands in the w >= 5 branch.
        let z = probit(0.999_999_7);
        assert_abs_diff_eq!(z, 4.991_4, epsilon = 1e-2);
    }

    #[test]
    fn scalar_transforms() {
        assert_eq!(transform_scalar(PostTransform::None, 2.5f32), 2.5);
        assert_abs_diff_eq!(transform_scalar(PostTransform::Logistic, 0.0f32), 0.5);
        assert_eq!(transform_scalar(PostTransform::Softmax, 3.0f32), 1.0);
        assert_eq!(transform_scalar(PostTransform::SoftmaxZero, 0.0f32), 0.0);
        assert_eq!(transform_scalar(PostTransform::SoftmaxZero, 2.0f32), 1.0);
    }
}
