//! 8-bit floating-point codec.
//!
//! Two encodings, both one octet with a sign bit:
//!
//! - [`F8E4M3`]: 4 exponent bits (bias 7), 3 mantissa bits. No infinities;
//!   one NaN slot per sign; max finite 448.
//! - [`F8E5M2`]: 5 exponent bits (bias 15), 2 mantissa bits. IEEE-style
//!   ±∞ and NaN; max finite 57344.
//!
//! Scalar conversions are bit-exact and table-free: narrowing from binary32
//! uses round-to-nearest-even, widening reproduces the exact binary32 bit
//! pattern (NaN slots widen to the canonical quiet NaN of their sign).
//!
//! [`Quantizer`] provides the bulk kernels with a scale, a zero point, and a
//! saturating/overflowing narrowing mode.

mod e4m3;
mod e5m2;
mod quantize;

pub use e4m3::F8E4M3;
pub use e5m2::F8E5M2;
pub use quantize::{QuantizeError, QuantizeInput, QuantizeTarget, Quantizer};
