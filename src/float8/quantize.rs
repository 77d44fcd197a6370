//! Bulk quantize/dequantize kernels.
//!
//! A [`Quantizer`] is configured once with a scale, a zero point, and the
//! overflow policy, then applied to whole arrays:
//!
//! ```text
//! quantize:   y[i] = cast_to_target(x[i] / scale + zero_point)
//! dequantize: y[i] = (f32(x[i]) - f32(zero_point)) * scale
//! ```
//!
//! Both directions are element-wise with no cross-element state, so large
//! arrays are chunked onto the rayon pool; short arrays stay serial because
//! dispatch costs more than the work.

use half::{bf16, f16};
use rayon::prelude::*;

use super::{F8E4M3, F8E5M2};

/// Element count below which the kernels do not bother with the thread pool.
const PARALLEL_CUTOFF: usize = 4096;

/// Error raised when configuring a [`Quantizer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantizeError {
    /// `saturate = false` only makes sense for targets with an overflow
    /// encoding, i.e. the 8-bit float types.
    #[error("saturate=false is only supported when quantizing to an 8-bit float type")]
    SaturateUnsupported,
}

// =============================================================================
// Input / target abstractions
// =============================================================================

/// A source element the quantize kernel can widen to `f32`.
pub trait QuantizeInput: Copy + Send + Sync {
    fn to_f32(self) -> f32;
}

impl QuantizeInput for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl QuantizeInput for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

impl QuantizeInput for bf16 {
    #[inline]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}

/// A quantization target type.
pub trait QuantizeTarget: Copy + Send + Sync {
    /// Whether this target is one of the 8-bit float types (the only ones
    /// for which `saturate = false` is meaningful).
    const IS_FLOAT8: bool;

    /// Cast a scaled value into the target, honoring the overflow policy.
    fn cast_saturating(v: f32, saturate: bool) -> Self;

    /// Widen back to `f32`.
    fn widen(self) -> f32;
}

impl QuantizeTarget for F8E4M3 {
    const IS_FLOAT8: bool = true;

    #[inline]
    fn cast_saturating(v: f32, saturate: bool) -> Self {
        F8E4M3::narrow(v, saturate)
    }

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }
}

impl QuantizeTarget for F8E5M2 {
    const IS_FLOAT8: bool = true;

    #[inline]
    fn cast_saturating(v: f32, saturate: bool) -> Self {
        // In a quantize kernel the saturating mode clamps infinities too.
        F8E5M2::narrow(v, saturate, false)
    }

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }
}

impl QuantizeTarget for u8 {
    const IS_FLOAT8: bool = false;

    #[inline]
    fn cast_saturating(v: f32, _saturate: bool) -> Self {
        // NaN clamps to 0 under Rust's saturating float-to-int cast.
        v.round_ties_even() as u8
    }

    #[inline]
    fn widen(self) -> f32 {
        self as f32
    }
}

impl QuantizeTarget for i8 {
    const IS_FLOAT8: bool = false;

    #[inline]
    fn cast_saturating(v: f32, _saturate: bool) -> Self {
        v.round_ties_even() as i8
    }

    #[inline]
    fn widen(self) -> f32 {
        self as f32
    }
}

// =============================================================================
// Quantizer
// =============================================================================

/// A configured quantize/dequantize operation.
///
/// # Example
///
/// ```
/// use canopy::float8::{F8E4M3, Quantizer};
///
/// let q = Quantizer::new(2.0, F8E4M3::ZERO, true).unwrap();
/// let codes = q.quantize(&[1.0f32, -3.0]);
/// assert_eq!(q.dequantize(&codes), vec![1.0, -3.0]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Quantizer<Q> {
    scale: f32,
    zero_point: Q,
    saturate: bool,
}

impl<Q: QuantizeTarget> Quantizer<Q> {
    /// Configure a quantizer.
    ///
    /// `saturate = false` is rejected for integer targets: those have no
    /// overflow encoding to fall into, so the flag is an unsupported
    /// parameter there.
    pub fn new(scale: f32, zero_point: Q, saturate: bool) -> Result<Self, QuantizeError> {
        if !saturate && !Q::IS_FLOAT8 {
            return Err(QuantizeError::SaturateUnsupported);
        }
        Ok(Self {
            scale,
            zero_point,
            saturate,
        })
    }

    /// Quantize an array: `y[i] = cast(x[i] / scale + zero_point)`.
    pub fn quantize<F: QuantizeInput>(&self, input: &[F]) -> Vec<Q> {
        let zp = self.zero_point.widen();
        let scale = self.scale;
        let saturate = self.saturate;
        let kernel = move |x: &F| Q::cast_saturating(x.to_f32() / scale + zp, saturate);
        if input.len() >= PARALLEL_CUTOFF {
            input.par_iter().map(kernel).collect()
        } else {
            input.iter().map(kernel).collect()
        }
    }

    /// Dequantize an array: `y[i] = (f32(x[i]) - f32(zero_point)) * scale`.
    pub fn dequantize(&self, input: &[Q]) -> Vec<f32> {
        let zp = self.zero_point.widen();
        let scale = self.scale;
        let kernel = move |x: &Q| (x.widen() - zp) * scale;
        if input.len() >= PARALLEL_CUTOFF {
            input.par_iter().map(kernel).collect()
        } else {
            input.iter().map(kernel).collect()
        }
    }
}
