//! The E5M2 8-bit float: 1 sign bit, 5 exponent bits (bias 15), 2 mantissa
//! bits.
//!
//! Unlike E4M3, this format keeps the IEEE-style specials: exponent-all-ones
//! with a zero mantissa is ±∞ and with a non-zero mantissa is NaN. The
//! largest finite magnitude is 57344.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit pattern of the canonical positive NaN.
const NAN_CODE: u8 = 0x7F;
/// Bit pattern of positive infinity.
const INF_CODE: u8 = 0x7C;
/// Bit pattern of the largest finite magnitude (57344.0).
const MAX_FINITE_CODE: u8 = 0x7B;

/// An 8-bit float with 5 exponent bits and 2 mantissa bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[repr(transparent)]
pub struct F8E5M2(u8);

impl F8E5M2 {
    /// The largest finite value, 57344.0.
    pub const MAX: Self = Self(MAX_FINITE_CODE);
    /// Positive infinity.
    pub const INFINITY: Self = Self(INF_CODE);
    /// The canonical (positive) NaN.
    pub const NAN: Self = Self(NAN_CODE);
    /// Positive zero.
    pub const ZERO: Self = Self(0);

    /// Reinterpret a raw octet.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw octet.
    #[inline]
    pub const fn to_bits(self) -> u8 {
        self.0
    }

    /// Whether this is a NaN encoding (exponent all ones, mantissa non-zero).
    #[inline]
    pub const fn is_nan(self) -> bool {
        self.0 & 0x7C == 0x7C && self.0 & 0x03 != 0
    }

    /// Whether this is one of the two infinity encodings.
    #[inline]
    pub const fn is_infinite(self) -> bool {
        self.0 & 0x7F == INF_CODE
    }

    /// Narrow a binary32 value with round-to-nearest-even. Finite values that
    /// overflow saturate to ±57344; infinite inputs keep their infinity
    /// encoding.
    #[inline]
    pub fn from_f32(v: f32) -> Self {
        Self::narrow(v, true, true)
    }

    /// Narrow with an explicit overflow policy. With `saturate`, every
    /// overflow lands on ±57344, unless `keep_infinity` preserves a
    /// genuinely infinite input as ±∞. Without `saturate`, every overflow
    /// becomes ±∞.
    pub(crate) fn narrow(v: f32, saturate: bool, keep_infinity: bool) -> Self {
        let bits = v.to_bits();
        let sign = ((bits >> 24) & 0x80) as u8;
        if v.is_nan() {
            return Self(sign | NAN_CODE);
        }
        if v.is_infinite() {
            let code = if saturate && !keep_infinity { MAX_FINITE_CODE } else { INF_CODE };
            return Self(sign | code);
        }

        let e = ((bits >> 23) & 0xFF) as i32;
        let m = bits & 0x007F_FFFF;
        let code = if e < 110 {
            // Below half the smallest subnormal.
            0
        } else if e <= 112 {
            // Subnormal band: shift the full 24-bit significand into place.
            round_even(0x0080_0000 | m, (134 - e) as u32) as u8
        } else if e <= 142 {
            // Normal band: rebias to 5 bits, keep the top 2 mantissa bits.
            let kept = (((e - 112) as u32) << 2) | (m >> 21);
            let rounded = kept + round_increment(kept, m, 21);
            if rounded > MAX_FINITE_CODE as u32 {
                overflow_code(saturate)
            } else {
                rounded as u8
            }
        } else {
            overflow_code(saturate)
        };
        Self(sign | code)
    }

    /// Widen to the exact binary32 bit pattern.
    pub fn to_f32(self) -> f32 {
        if self.is_nan() {
            let quiet = if self.0 & 0x80 != 0 { 0xFFC0_0000 } else { 0x7FC0_0000 };
            return f32::from_bits(quiet);
        }
        if self.is_infinite() {
            let inf = if self.0 & 0x80 != 0 { 0xFF80_0000 } else { 0x7F80_0000 };
            return f32::from_bits(inf);
        }

        let mut expo = ((self.0 & 0x7C) >> 2) as u32;
        let mut mant = (self.0 & 0x03) as u32;
        let sign = (self.0 & 0x80) as u32;
        let mut res = sign << 24;
        if expo == 0 {
            if mant > 0 {
                // Subnormal: renormalize the 2-bit mantissa.
                expo = 112;
                while mant & 0x2 == 0 {
                    mant <<= 1;
                    expo -= 1;
                }
                res |= (mant & 0x1) << 22;
                res |= expo << 23;
            }
        } else {
            res |= mant << 21;
            res |= (expo + 112) << 23;
        }
        f32::from_bits(res)
    }
}

#[inline]
fn overflow_code(saturate: bool) -> u8 {
    if saturate {
        MAX_FINITE_CODE
    } else {
        INF_CODE
    }
}

#[inline]
fn round_increment(kept: u32, m: u32, shift: u32) -> u32 {
    let round = (m >> (shift - 1)) & 1;
    let sticky = m & ((1 << (shift - 1)) - 1) != 0;
    u32::from(round == 1 && (sticky || kept & 1 == 1))
}

#[inline]
fn round_even(significand: u32, shift: u32) -> u32 {
    let kept = significand >> shift;
    kept + round_increment(kept, significand, shift)
}

impl From<F8E5M2> for f32 {
    #[inline]
    fn from(v: F8E5M2) -> f32 {
        v.to_f32()
    }
}

impl From<f32> for F8E5M2 {
    #[inline]
    fn from(v: f32) -> Self {
        Self::from_f32(v)
    }
}

impl fmt::Display for F8E5M2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(F8E5M2::from_bits(0x00).to_f32(), 0.0);
        assert_eq!(F8E5M2::from_bits(0x80).to_f32(), -0.0);
        assert_eq!(F8E5M2::from_bits(0x3C).to_f32(), 1.0);
        assert_eq!(F8E5M2::from_bits(0xBC).to_f32(), -1.0);
        assert_eq!(F8E5M2::from_bits(0x7B).to_f32(), 57344.0);
        // Smallest subnormal: 2^-16.
        assert_eq!(F8E5M2::from_bits(0x01).to_f32(), 1.52587890625e-5);
        // Smallest normal: 2^-14.
        assert_eq!(F8E5M2::from_bits(0x04).to_f32(), 6.103515625e-5);
    }

    #[test]
    fn specials_decode_exactly() {
        assert_eq!(F8E5M2::from_bits(0x7C).to_f32(), f32::INFINITY);
        assert_eq!(F8E5M2::from_bits(0xFC).to_f32(), f32::NEG_INFINITY);
        for mant in 1u8..=3 {
            assert_eq!(F8E5M2::from_bits(0x7C | mant).to_f32().to_bits(), 0x7FC0_0000);
            assert_eq!(F8E5M2::from_bits(0xFC | mant).to_f32().to_bits(), 0xFFC0_0000);
        }
    }

    #[test]
    fn spec_vectors() {
        assert_eq!(F8E5M2::from_f32(f32::INFINITY).to_bits(), 0x7C);
        assert_eq!(F8E5M2::from_f32(f32::NEG_INFINITY).to_bits(), 0xFC);
        // 65504 (the binary16 max) exceeds 57344 and lands on the last
        // finite code under the saturating narrow.
        assert_eq!(F8E5M2::from_f32(65504.0).to_bits(), 0x7B);
        assert_eq!(F8E5M2::from_f32(f32::NAN).to_bits(), 0x7F);
    }

    #[test]
    fn overflow_policies() {
        assert_eq!(F8E5M2::narrow(1e9, true, true).to_bits(), 0x7B);
        assert_eq!(F8E5M2::narrow(1e9, false, false).to_bits(), 0x7C);
        assert_eq!(F8E5M2::narrow(-1e9, false, false).to_bits(), 0xFC);
        assert_eq!(F8E5M2::narrow(f32::INFINITY, true, false).to_bits(), 0x7B);
        assert_eq!(F8E5M2::narrow(f32::INFINITY, false, false).to_bits(), 0x7C);
    }

    #[test]
    fn round_to_nearest_even_ties() {
        // 1.0 is code 0x3C, 1.25 is 0x3D; the tie at 1.125 goes to even.
        assert_eq!(F8E5M2::from_f32(1.125).to_bits(), 0x3C);
        // 1.25 (0x3D) vs 1.5 (0x3E): tie at 1.375 goes up to even.
        assert_eq!(F8E5M2::from_f32(1.375).to_bits(), 0x3E);
    }

    #[test]
    fn subnormal_narrowing() {
        // Smallest subnormal 2^-16 and its halfway point against zero.
        assert_eq!(F8E5M2::from_f32(1.52587890625e-5).to_bits(), 0x01);
        assert_eq!(F8E5M2::from_f32(7.62939453125e-6).to_bits(), 0x00);
        assert_eq!(F8E5M2::from_f32(1e-5).to_bits(), 0x01);
        // Largest subnormal 3 * 2^-16; rounding past it reaches the first
        // normal code.
        assert_eq!(F8E5M2::from_f32(4.57763671875e-5).to_bits(), 0x03);
        assert_eq!(F8E5M2::from_f32(5.5e-5).to_bits(), 0x04);
    }

    #[test]
    fn roundtrip_all_finite_codes() {
        for bits in 0u8..=255 {
            let v = F8E5M2::from_bits(bits);
            if v.is_nan() {
                assert_eq!(F8E5M2::from_f32(v.to_f32()).to_bits() & 0x7F, 0x7F);
            } else {
                assert_eq!(F8E5M2::from_f32(v.to_f32()).to_bits(), bits, "code {bits:#04x}");
            }
        }
    }
}
