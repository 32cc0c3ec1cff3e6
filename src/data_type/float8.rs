//! Software encodings of the two 8-bit floating point formats.
//!
//! Both encoders round to nearest even and saturate finite values that
//! overflow the format to its largest finite value.

use bytemuck::{Pod, Zeroable};
use std::fmt;

struct Format {
    mantissa_bits: u32,
    exponent_mask: u8,
    bias: i32,
    has_infinity: bool,
    /// Encoding of the largest finite value, without sign.
    max_bits: u8,
    /// Canonical NaN encoding, without sign.
    nan_bits: u8,
}

const E4M3: Format = Format {
    mantissa_bits: 3,
    exponent_mask: 0xf,
    bias: 7,
    has_infinity: false,
    max_bits: 0x7e,
    nan_bits: 0x7f,
};

const E5M2: Format = Format {
    mantissa_bits: 2,
    exponent_mask: 0x1f,
    bias: 15,
    has_infinity: true,
    max_bits: 0x7b,
    nan_bits: 0x7f,
};

impl Format {
    fn is_nan(&self, bits: u8) -> bool {
        let magnitude = bits & 0x7f;
        if self.has_infinity {
            let exponent = magnitude >> self.mantissa_bits;
            let mantissa = magnitude & self.mantissa_mask();
            exponent == self.exponent_mask && mantissa != 0
        } else {
            magnitude == self.nan_bits
        }
    }

    fn mantissa_mask(&self) -> u8 {
        (1u8 << self.mantissa_bits) - 1
    }

    fn decode(&self, bits: u8) -> f64 {
        let sign = if bits & 0x80 != 0 { -1.0 } else { 1.0 };
        if self.is_nan(bits) {
            return f64::NAN;
        }

        let magnitude = bits & 0x7f;
        let exponent = (magnitude >> self.mantissa_bits) as i32;
        let mantissa = (magnitude & self.mantissa_mask()) as f64;
        let m = self.mantissa_bits as i32;

        if self.has_infinity && exponent == self.exponent_mask as i32 {
            return sign * f64::INFINITY;
        }

        if exponent == 0 {
            sign * mantissa * 2f64.powi(1 - self.bias - m)
        } else {
            sign * (1.0 + mantissa / 2f64.powi(m)) * 2f64.powi(exponent - self.bias)
        }
    }

    fn encode(&self, value: f64) -> u8 {
        let sign = if value.is_sign_negative() { 0x80 } else { 0 };
        if value.is_nan() {
            return sign | self.nan_bits;
        }

        let magnitude = value.abs();
        if magnitude == 0.0 {
            return sign;
        }
        if magnitude.is_infinite() {
            return if self.has_infinity {
                sign | (self.exponent_mask << self.mantissa_bits)
            } else {
                sign | self.max_bits
            };
        }

        let m = self.mantissa_bits as i32;
        let min_exponent = 1 - self.bias;

        let mut exponent = magnitude.log2().floor() as i32;
        // `log2` may be off by one next to powers of two.
        if 2f64.powi(exponent) > magnitude {
            exponent -= 1;
        } else if 2f64.powi(exponent + 1) <= magnitude {
            exponent += 1;
        }
        let exponent = exponent.max(min_exponent);

        let mut significand = (magnitude / 2f64.powi(exponent - m)).round_ties_even();
        let mut exponent = exponent;
        if significand >= 2f64.powi(m + 1) {
            significand /= 2.0;
            exponent += 1;
        }

        let max_finite = self.decode(self.max_bits);
        if significand * 2f64.powi(exponent - m) > max_finite {
            return sign | self.max_bits;
        }

        let significand = significand as u8;
        if significand < (1 << m) {
            sign | significand
        } else {
            let exponent_field = (exponent + self.bias) as u8;
            sign | (exponent_field << m) | (significand - (1 << m))
        }
    }
}

macro_rules! float8_type {
    ($name:ident, $format:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Equality compares encodings bitwise.
        #[derive(Copy, Clone, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
        #[repr(transparent)]
        pub struct $name(u8);

        impl $name {
            pub const ZERO: Self = Self(0);
            pub const ONE: Self = Self((($format.bias as u8) << $format.mantissa_bits));
            pub const MAX: Self = Self($format.max_bits);
            pub const MIN_POSITIVE: Self = Self(1 << $format.mantissa_bits);

            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            pub const fn to_bits(self) -> u8 {
                self.0
            }

            pub fn from_f64(value: f64) -> Self {
                Self($format.encode(value))
            }

            pub fn from_f32(value: f32) -> Self {
                Self::from_f64(value as f64)
            }

            pub fn to_f64(self) -> f64 {
                $format.decode(self.0)
            }

            pub fn to_f32(self) -> f32 {
                self.to_f64() as f32
            }

            pub fn is_nan(self) -> bool {
                $format.is_nan(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#04x} = {})", stringify!($name), self.0, self.to_f64())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.to_f64(), f)
            }
        }
    };
}

float8_type!(F8E4M3, E4M3, "8-bit float with 4 exponent bits and 3 mantissa bits.");
float8_type!(F8E5M2, E5M2, "8-bit float with 5 exponent bits and 2 mantissa bits.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e4m3_known_encodings() {
        assert_eq!(F8E4M3::from_f64(1.0).to_bits(), 0x38);
        assert_eq!(F8E4M3::ONE.to_f64(), 1.0);
        assert_eq!(F8E4M3::from_f64(-2.0).to_bits(), 0xc0);
        assert_eq!(F8E4M3::MAX.to_f64(), 448.0);
        assert_eq!(F8E4M3::MIN_POSITIVE.to_f64(), 2f64.powi(-6));
        assert_eq!(F8E4M3::from_bits(0x01).to_f64(), 2f64.powi(-9));
    }

    #[test]
    fn e5m2_known_encodings() {
        assert_eq!(F8E5M2::from_f64(1.0).to_bits(), 0x3c);
        assert_eq!(F8E5M2::MAX.to_f64(), 57344.0);
        assert_eq!(F8E5M2::MIN_POSITIVE.to_f64(), 2f64.powi(-14));
        assert!(F8E5M2::from_bits(0x7c).to_f64().is_infinite());
        assert!(F8E5M2::from_bits(0x7d).is_nan());
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(F8E4M3::from_f64(1000.0), F8E4M3::MAX);
        assert_eq!(F8E4M3::from_f64(f64::INFINITY), F8E4M3::MAX);
        assert_eq!(F8E4M3::from_f64(-500.0).to_f64(), -448.0);
        assert_eq!(F8E5M2::from_f64(1e6), F8E5M2::MAX);
    }

    #[test]
    fn rounds_to_nearest_even() {
        // Between 1.0 (mantissa 000) and 1.125 (mantissa 001).
        assert_eq!(F8E4M3::from_f64(1.0625).to_f64(), 1.0);
        // Between 1.125 and 1.25, ties to the even mantissa 010.
        assert_eq!(F8E4M3::from_f64(1.1875).to_f64(), 1.25);
        assert_eq!(F8E4M3::from_f64(1.2).to_f64(), 1.25);
    }

    #[test]
    fn nan_is_preserved() {
        assert!(F8E4M3::from_f64(f64::NAN).is_nan());
        assert!(F8E4M3::from_f64(f64::NAN).to_f64().is_nan());
        assert!(F8E5M2::from_f64(f64::NAN).is_nan());
    }

    #[test]
    fn every_finite_encoding_is_stable() {
        for bits in 0..=u8::MAX {
            let e4m3 = F8E4M3::from_bits(bits);
            if !e4m3.is_nan() {
                assert_eq!(F8E4M3::from_f64(e4m3.to_f64()).to_bits(), bits);
            }

            let e5m2 = F8E5M2::from_bits(bits);
            if !e5m2.is_nan() {
                assert_eq!(F8E5M2::from_f64(e5m2.to_f64()).to_bits(), bits);
            }
        }
    }
}
