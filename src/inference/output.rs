//! Prediction output container.

use approx::{AbsDiffEq, RelativeEq};

use crate::repr::Threshold;

/// Prediction scores: flat row-major storage with shape metadata.
///
/// Each row holds `n_targets` values (1 for regression, K for a K-class
/// classifier).
///
/// # Example
///
/// ```
/// use canopy::inference::Prediction;
///
/// let p = Prediction::new(vec![0.1f32, 0.9, 0.4, 0.6], 2, 2);
/// assert_eq!(p.row(1), &[0.4, 0.6]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction<T> {
    data: Vec<T>,
    n_rows: usize,
    n_targets: usize,
}

impl<T: Threshold> Prediction<T> {
    /// Wrap flat row-major data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != n_rows * n_targets`.
    pub fn new(data: Vec<T>, n_rows: usize, n_targets: usize) -> Self {
        assert_eq!(
            data.len(),
            n_rows * n_targets,
            "data length {} does not match shape {}x{}",
            data.len(),
            n_rows,
            n_targets
        );
        Self {
            data,
            n_rows,
            n_targets,
        }
    }

    /// Zero-filled output of the given shape.
    pub fn zeros(n_rows: usize, n_targets: usize) -> Self {
        Self {
            data: vec![T::zero(); n_rows * n_targets],
            n_rows,
            n_targets,
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    /// Shape as `(rows, targets)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_targets)
    }

    /// One row of scores.
    #[inline]
    pub fn row(&self, row_idx: usize) -> &[T] {
        let start = row_idx * self.n_targets;
        &self.data[start..start + self.n_targets]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.data.chunks_exact(self.n_targets.max(1))
    }

    /// Raw flat data.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume into the flat data.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T: Threshold + AbsDiffEq<Epsilon = T>> AbsDiffEq for Prediction<T> {
    type Epsilon = T;

    fn default_epsilon() -> T {
        T::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: T) -> bool {
        self.n_rows == other.n_rows
            && self.n_targets == other.n_targets
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.abs_diff_eq(b, epsilon))
    }
}

impl<T: Threshold + RelativeEq<Epsilon = T>> RelativeEq for Prediction<T> {
    fn default_max_relative() -> T {
        T::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: T, max_relative: T) -> bool {
        self.n_rows == other.n_rows
            && self.n_targets == other.n_targets
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| a.relative_eq(b, epsilon, max_relative))
    }
}
