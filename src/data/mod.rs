//! Input data access for prediction.
//!
//! The evaluator consumes any type implementing [`DataMatrix`]: a dense,
//! row-major view over the feature values of a batch. [`RowMatrix`] is the
//! canonical owned implementation; `ndarray` arrays convert into it.
//!
//! Element types are abstracted by [`FeatureValue`], which covers the four
//! supported input types (`f32`, `f64`, `i32`, `i64`). Integer inputs are
//! never considered missing; float inputs are missing when NaN.

use ndarray::ArrayView2;

use crate::float8::{F8E4M3, F8E5M2};

// =============================================================================
// FeatureValue
// =============================================================================

/// A scalar feature value the tree walk can compare against a threshold.
///
/// Comparisons happen in `f64`, which widens every supported input type
/// without loss (and every threshold type, so mixed input/threshold
/// evaluations stay exact).
pub trait FeatureValue: Copy + Send + Sync + 'static {
    /// Widen to `f64` for threshold comparison.
    fn to_f64(self) -> f64;

    /// Whether this value counts as missing (routes through missing-tracks).
    fn is_missing(self) -> bool;
}

impl FeatureValue for f32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn is_missing(self) -> bool {
        self.is_nan()
    }
}

impl FeatureValue for f64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn is_missing(self) -> bool {
        self.is_nan()
    }
}

impl FeatureValue for i32 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn is_missing(self) -> bool {
        false
    }
}

impl FeatureValue for i64 {
    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn is_missing(self) -> bool {
        false
    }
}

// Quantized batches decode through the codec on their way into the walk.

impl FeatureValue for F8E4M3 {
    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }

    #[inline]
    fn is_missing(self) -> bool {
        self.is_nan()
    }
}

impl FeatureValue for F8E5M2 {
    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }

    #[inline]
    fn is_missing(self) -> bool {
        self.is_nan()
    }
}

// =============================================================================
// DataMatrix
// =============================================================================

/// Dense row-major access to a batch of feature rows.
pub trait DataMatrix: Sync {
    /// Element type of the matrix.
    type Element: FeatureValue;

    /// Number of rows (samples).
    fn num_rows(&self) -> usize;

    /// Number of features (columns) per row.
    fn num_features(&self) -> usize;

    /// Borrow one row as a contiguous slice.
    fn row(&self, row_idx: usize) -> &[Self::Element];
}

// =============================================================================
// RowMatrix
// =============================================================================

/// Owned dense matrix in row-major layout.
///
/// # Example
///
/// ```
/// use canopy::data::{DataMatrix, RowMatrix};
///
/// let m = RowMatrix::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], 2, 2);
/// assert_eq!(m.row(1), &[3.0, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RowMatrix<S> {
    data: Vec<S>,
    num_rows: usize,
    num_features: usize,
}

impl<S: FeatureValue> RowMatrix<S> {
    /// Create a matrix from flat row-major data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != num_rows * num_features`.
    pub fn from_vec(data: Vec<S>, num_rows: usize, num_features: usize) -> Self {
        assert_eq!(
            data.len(),
            num_rows * num_features,
            "data length {} does not match shape {}x{}",
            data.len(),
            num_rows,
            num_features
        );
        Self {
            data,
            num_rows,
            num_features,
        }
    }

    /// Treat a 1-D buffer as a single row.
    pub fn single_row(data: Vec<S>) -> Self {
        let num_features = data.len();
        Self {
            data,
            num_rows: 1,
            num_features,
        }
    }

    /// Copy out of an `ndarray` 2-D view, whatever its layout.
    pub fn from_ndarray(view: ArrayView2<'_, S>) -> Self {
        let (num_rows, num_features) = view.dim();
        let data = view.iter().copied().collect();
        Self {
            data,
            num_rows,
            num_features,
        }
    }

    /// Raw flat data.
    #[inline]
    pub fn as_slice(&self) -> &[S] {
        &self.data
    }
}

impl<S: FeatureValue> DataMatrix for RowMatrix<S> {
    type Element = S;

    #[inline]
    fn num_rows(&self) -> usize {
        self.num_rows
    }

    #[inline]
    fn num_features(&self) -> usize {
        self.num_features
    }

    #[inline]
    fn row(&self, row_idx: usize) -> &[S] {
        let start = row_idx * self.num_features;
        &self.data[start..start + self.num_features]
    }
}
