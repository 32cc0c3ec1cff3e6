use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Elementwise activation applied by a fused epilogue.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Identity,
    /// Clamp to `[0, inf)`.
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, value: Complex64) -> Complex64 {
        match self {
            Activation::Identity => value,
            Activation::Relu => Complex64::new(value.re.max(0.0), 0.0),
            Activation::Sigmoid => Complex64::new(sigmoid(value.re), 0.0),
        }
    }

    /// Derivative of the activation evaluated at `input`.
    ///
    /// Back-propagation fusions multiply the incoming gradient by this value,
    /// with `input` read from the auxiliary tensor saved by the forward pass.
    pub fn derivative(self, input: f64) -> f64 {
        match self {
            Activation::Identity => 1.0,
            Activation::Relu => {
                if input > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(input);
                s * (1.0 - s)
            }
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn relu_clamps_negative() {
        assert_eq!(Activation::Relu.apply(Complex64::new(-2.0, 0.0)).re, 0.0);
        assert_eq!(Activation::Relu.apply(Complex64::new(3.0, 0.0)).re, 3.0);
        assert_eq!(Activation::Relu.derivative(-1.0), 0.0);
        assert_eq!(Activation::Relu.derivative(0.5), 1.0);
    }

    #[test]
    fn sigmoid_derivative_at_zero() {
        assert_relative_eq!(Activation::Sigmoid.apply(Complex64::new(0.0, 0.0)).re, 0.5);
        assert_relative_eq!(Activation::Sigmoid.derivative(0.0), 0.25);
    }

    #[test]
    fn identity_preserves_complex_values() {
        let z = Complex64::new(1.0, -2.0);
        assert_eq!(Activation::Identity.apply(z), z);
    }
}
