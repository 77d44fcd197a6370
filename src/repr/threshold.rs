//! Threshold-type abstraction.
//!
//! A compiled forest is generic over its threshold storage type, which also
//! serves as the accumulator type during evaluation (the accumulator is
//! never narrower than the output). The threshold type additionally decides
//! how many categories a folded membership bitmask can hold: its own bit
//! width.

use std::fmt;
use std::ops::{Add, Div, Neg, Sub};

/// Numeric type usable as threshold storage and score accumulator.
///
/// Implemented for `f32` (32-bit membership masks) and `f64` (64-bit
/// membership masks). Comparisons against input values happen in `f64`,
/// which widens both implementations exactly.
pub trait Threshold:
    Copy
    + Default
    + PartialOrd
    + PartialEq
    + Send
    + Sync
    + fmt::Debug
    + fmt::Display
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + Div<Output = Self>
    + 'static
{
    /// Width of the membership bitmask this type can carry.
    const MASK_BITS: u32;

    /// Additive identity.
    fn zero() -> Self;

    /// Multiplicative identity.
    fn one() -> Self;

    /// Exact widening for comparisons and transforms.
    fn to_f64(self) -> f64;

    /// Narrowing from the `f64` compute domain.
    fn from_f64(v: f64) -> Self;

    /// NaN test (thresholds are never NaN in a valid forest; accumulators
    /// can be).
    fn is_nan(self) -> bool;

    /// Whether `v` can live in a membership mask of this width: integral and
    /// in `[1, MASK_BITS]`.
    #[inline]
    fn maskable(v: f64) -> bool {
        v >= 1.0 && v <= Self::MASK_BITS as f64 && v.floor() == v
    }

    /// Set the mask bit for an integral category value, reinterpreting the
    /// storage as raw bits.
    fn mask_insert(self, category: f64) -> Self;

    /// Test the mask bit for an input value; anything non-integral or out of
    /// `[1, MASK_BITS]` is never a member.
    fn mask_contains(self, value: f64) -> bool;
}

impl Threshold for f32 {
    const MASK_BITS: u32 = 32;

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn is_nan(self) -> bool {
        self.is_nan()
    }

    #[inline]
    fn mask_insert(self, category: f64) -> Self {
        debug_assert!(Self::maskable(category));
        f32::from_bits(self.to_bits() | 1u32 << (category as u32 - 1))
    }

    #[inline]
    fn mask_contains(self, value: f64) -> bool {
        Self::maskable(value) && self.to_bits() & (1u32 << (value as u32 - 1)) != 0
    }
}

impl Threshold for f64 {
    const MASK_BITS: u32 = 64;

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn is_nan(self) -> bool {
        self.is_nan()
    }

    #[inline]
    fn mask_insert(self, category: f64) -> Self {
        debug_assert!(Self::maskable(category));
        f64::from_bits(self.to_bits() | 1u64 << (category as u64 - 1))
    }

    #[inline]
    fn mask_contains(self, value: f64) -> bool {
        Self::maskable(value) && self.to_bits() & (1u64 << (value as u64 - 1)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maskable_range() {
        assert!(<f32 as Threshold>::maskable(1.0));
        assert!(<f32 as Threshold>::maskable(32.0));
        assert!(!<f32 as Threshold>::maskable(0.0));
        assert!(!<f32 as Threshold>::maskable(33.0));
        assert!(!<f32 as Threshold>::maskable(2.5));
        assert!(!<f32 as Threshold>::maskable(f64::NAN));

        assert!(<f64 as Threshold>::maskable(64.0));
        assert!(!<f64 as Threshold>::maskable(65.0));
    }

    #[test]
    fn mask_insert_and_test() {
        let mask = f32::zero().mask_insert(1.0).mask_insert(3.0).mask_insert(5.0);
        assert_eq!(mask.to_bits(), 0b10101);
        assert!(mask.mask_contains(1.0));
        assert!(!mask.mask_contains(2.0));
        assert!(mask.mask_contains(3.0));
        assert!(mask.mask_contains(5.0));
        assert!(!mask.mask_contains(0.0));
        assert!(!mask.mask_contains(3.5));
        assert!(!mask.mask_contains(100.0));
    }

    #[test]
    fn wide_mask_uses_all_64_bits() {
        let mask = f64::zero().mask_insert(64.0);
        assert!(mask.mask_contains(64.0));
        assert!(!mask.mask_contains(63.0));
    }
}
