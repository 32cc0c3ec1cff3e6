use bytemuck::Pod;
use half::{bf16, f16};
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

mod float8;

pub use float8::{F8E4M3, F8E5M2};

/// Element type of a tensor materialized by the test bed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    Bf16,
    /// 8-bit float with 4 exponent and 3 mantissa bits, no infinities.
    F8E4M3,
    /// 8-bit float with 5 exponent and 2 mantissa bits.
    F8E5M2,
    I8,
    I32,
    /// Complex number with `f32` real and imaginary parts.
    C32,
}

impl DataType {
    pub fn size_in_bits(self) -> usize {
        match self {
            DataType::F8E4M3 | DataType::F8E5M2 | DataType::I8 => 8,
            DataType::F16 | DataType::Bf16 => 16,
            DataType::F32 | DataType::I32 => 32,
            DataType::C32 => 64,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        self.size_in_bits() / 8
    }

    /// Whether this is one of the two 8-bit float formats whose outputs
    /// are tracked with an absolute maximum for later rescaling.
    pub fn is_narrow_float(self) -> bool {
        matches!(self, DataType::F8E4M3 | DataType::F8E5M2)
    }

    pub fn is_complex(self) -> bool {
        self == DataType::C32
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::I8 | DataType::I32)
    }

    /// Largest finite value representable by the type.
    pub fn max_finite(self) -> f64 {
        match self {
            DataType::F32 | DataType::C32 => f32::MAX as f64,
            DataType::F16 => f16::MAX.to_f64(),
            DataType::Bf16 => bf16::MAX.to_f64(),
            DataType::F8E4M3 => F8E4M3::MAX.to_f64(),
            DataType::F8E5M2 => F8E5M2::MAX.to_f64(),
            DataType::I8 => i8::MAX as f64,
            DataType::I32 => i32::MAX as f64,
        }
    }

    /// Smallest positive normal value. Used as the floor of relative
    /// comparisons. Integer types use 1.
    pub fn min_positive_normal(self) -> f64 {
        match self {
            DataType::F32 | DataType::C32 => f32::MIN_POSITIVE as f64,
            DataType::F16 => f16::MIN_POSITIVE.to_f64(),
            DataType::Bf16 => bf16::MIN_POSITIVE.to_f64(),
            DataType::F8E4M3 => F8E4M3::MIN_POSITIVE.to_f64(),
            DataType::F8E5M2 => F8E5M2::MIN_POSITIVE.to_f64(),
            DataType::I8 | DataType::I32 => 1.0,
        }
    }

    /// Rounds `value` to the nearest value representable by this type.
    pub fn quantize(self, value: Complex64) -> Complex64 {
        fn round_trip<T: Element>(value: Complex64) -> Complex64 {
            T::from_compute(value).to_compute()
        }

        match self {
            DataType::F32 => round_trip::<f32>(value),
            DataType::F16 => round_trip::<f16>(value),
            DataType::Bf16 => round_trip::<bf16>(value),
            DataType::F8E4M3 => round_trip::<F8E4M3>(value),
            DataType::F8E5M2 => round_trip::<F8E5M2>(value),
            DataType::I8 => round_trip::<i8>(value),
            DataType::I32 => round_trip::<i32>(value),
            DataType::C32 => round_trip::<Complex32>(value),
        }
    }
}

/// Host element type that can be stored in a [`HostTensor`](crate::HostTensor)
/// and mirrored byte-for-byte to device memory.
///
/// All arithmetic of the reference path happens on `Complex64` values;
/// real types carry a zero imaginary part.
pub trait Element: Pod + PartialEq + Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Converts from `f64`, rounding to nearest even and saturating
    /// where the type cannot represent the value.
    fn from_f64(value: f64) -> Self;

    /// Real part of the element as `f64`.
    fn to_f64(self) -> f64;

    fn from_compute(value: Complex64) -> Self {
        Self::from_f64(value.re)
    }

    fn to_compute(self) -> Complex64 {
        Complex64::new(self.to_f64(), 0.0)
    }
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }
}

impl Element for bf16 {
    const DATA_TYPE: DataType = DataType::Bf16;

    fn from_f64(value: f64) -> Self {
        bf16::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        bf16::to_f64(self)
    }
}

impl Element for F8E4M3 {
    const DATA_TYPE: DataType = DataType::F8E4M3;

    fn from_f64(value: f64) -> Self {
        F8E4M3::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        F8E4M3::to_f64(self)
    }
}

impl Element for F8E5M2 {
    const DATA_TYPE: DataType = DataType::F8E5M2;

    fn from_f64(value: f64) -> Self {
        F8E5M2::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        F8E5M2::to_f64(self)
    }
}

impl Element for i8 {
    const DATA_TYPE: DataType = DataType::I8;

    fn from_f64(value: f64) -> Self {
        // `as` saturates and maps NaN to zero.
        value.round_ties_even() as i8
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for i32 {
    const DATA_TYPE: DataType = DataType::I32;

    fn from_f64(value: f64) -> Self {
        value.round_ties_even() as i32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for Complex32 {
    const DATA_TYPE: DataType = DataType::C32;

    fn from_f64(value: f64) -> Self {
        Complex32::new(value as f32, 0.0)
    }

    fn to_f64(self) -> f64 {
        self.re as f64
    }

    fn from_compute(value: Complex64) -> Self {
        Complex32::new(value.re as f32, value.im as f32)
    }

    fn to_compute(self) -> Complex64 {
        Complex64::new(self.re as f64, self.im as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_float_classification() {
        assert!(DataType::F8E4M3.is_narrow_float());
        assert!(DataType::F8E5M2.is_narrow_float());
        assert!(!DataType::F16.is_narrow_float());
        assert!(!DataType::I8.is_narrow_float());
    }

    #[test]
    fn limits() {
        assert_eq!(DataType::F8E4M3.max_finite(), 448.0);
        assert_eq!(DataType::F8E5M2.max_finite(), 57344.0);
        assert_eq!(DataType::F16.max_finite(), 65504.0);
        assert_eq!(DataType::F32.min_positive_normal(), f32::MIN_POSITIVE as f64);
        assert_eq!(DataType::F8E4M3.min_positive_normal(), 2f64.powi(-6));
        assert_eq!(DataType::F8E5M2.min_positive_normal(), 2f64.powi(-14));
        assert_eq!(DataType::I32.min_positive_normal(), 1.0);
    }

    #[test]
    fn quantize_rounds_to_representable() {
        let value = Complex64::new(1.0 + 2f64.powi(-12), 3.0);
        assert_eq!(DataType::F16.quantize(value), Complex64::new(1.0, 0.0));
        assert_eq!(DataType::I8.quantize(Complex64::new(300.0, 0.0)).re, 127.0);
        assert_eq!(DataType::C32.quantize(value).im, 3.0);
    }
}
