//! Host reference GEMM with the fused epilogue.
//!
//! The reference reads exactly the tensors the kernel reads, through the same
//! logical `(row, col, batch)` views, so layouts and broadcast patterns are
//! exercised identically on both sides.

use crate::{
    activation::Activation,
    data_type::DataType,
    layout::TensorLayout,
    tensor::{HostTensor, TensorData},
};
use num_complex::Complex64;

pub struct MainloopParams<'a> {
    /// `(M, K, L)`
    pub a: &'a HostTensor,
    /// `(K, N, L)`
    pub b: &'a HostTensor,
    pub accumulator: DataType,
}

/// Alpha or beta as read at each output coordinate.
#[derive(Copy, Clone, Debug)]
pub enum ScalarView<'a> {
    Value(f64),
    /// Values read at `layout.offset(m, n, l)` over the `(M, N, L)` output.
    Broadcast {
        data: &'a TensorData,
        layout: TensorLayout,
    },
}

impl ScalarView<'_> {
    pub fn at(&self, m: usize, n: usize, l: usize) -> Complex64 {
        match self {
            ScalarView::Value(value) => Complex64::new(*value, 0.0),
            ScalarView::Broadcast { data, layout } => data.get(layout.offset(m, n, l)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScaleFactors {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub aux: f64,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self {
            a: 1.0,
            b: 1.0,
            c: 1.0,
            d: 1.0,
            aux: 1.0,
        }
    }
}

pub struct EpilogueParams<'a> {
    pub c: &'a HostTensor,
    pub d: &'a mut HostTensor,
    pub alpha: ScalarView<'a>,
    pub beta: ScalarView<'a>,
    pub scale: Option<ScaleFactors>,
    /// Length-`M` bias added before the activation.
    pub bias: Option<&'a HostTensor>,
    /// Length-`M` gradient accumulated from the activation derivative.
    pub dbias: Option<&'a mut HostTensor>,
    pub aux_in: Option<&'a HostTensor>,
    pub aux_out: Option<&'a mut HostTensor>,
    /// Running maximum of `|D|` before `scale_d`.
    pub abs_max_d: Option<&'a mut HostTensor>,
    /// Running maximum of `|Aux|` before `scale_aux`.
    pub abs_max_aux: Option<&'a mut HostTensor>,
    pub activation: Activation,
}

/// Computes `D` and every active auxiliary output.
///
/// For each output `(m, n, l)`:
/// ```text
/// acc  = sum_k A(m, k, l) * B(k, n, l)            (accumulator precision)
/// out  = alpha * scale_a * scale_b * acc + beta * scale_c * C(m, n, l)
/// out += bias[m]
/// backward: out *= activation'(Aux(m, n, l)); dbias[m] += out
/// forward:  Aux(m, n, l) = out * scale_aux;   out = activation(out)
/// D(m, n, l) = out * scale_d
/// ```
pub fn gemm(mainloop: &MainloopParams, epilogue: &mut EpilogueParams) {
    let [m_extent, n_extent, l_extent] = epilogue.d.layout().extent();
    let k_extent = mainloop.a.layout().cols();
    debug_assert_eq!(mainloop.a.layout().extent(), [m_extent, k_extent, l_extent]);
    debug_assert_eq!(mainloop.b.layout().extent(), [k_extent, n_extent, l_extent]);

    tracing::debug!(
        m = m_extent,
        n = n_extent,
        k = k_extent,
        l = l_extent,
        "computing reference gemm"
    );

    let scale = epilogue.scale.unwrap_or_default();
    let mut abs_max_d = 0.0f64;
    let mut abs_max_aux = 0.0f64;
    let mut dbias = vec![Complex64::new(0.0, 0.0); m_extent];

    for l in 0..l_extent {
        for m in 0..m_extent {
            for n in 0..n_extent {
                let mut acc = Complex64::new(0.0, 0.0);
                for k in 0..k_extent {
                    let product = mainloop.a.at(m, k, l) * mainloop.b.at(k, n, l);
                    acc = mainloop.accumulator.quantize(acc + product);
                }

                let mut out = epilogue.alpha.at(m, n, l) * scale.a * scale.b * acc
                    + epilogue.beta.at(m, n, l) * scale.c * epilogue.c.at(m, n, l);

                if let Some(bias) = epilogue.bias {
                    out += bias.at(m, 0, 0);
                }

                if let Some(aux) = epilogue.aux_in {
                    out *= epilogue.activation.derivative(aux.real_at(m, n, l));
                    dbias[m] += out;
                } else {
                    if let Some(aux) = epilogue.aux_out.as_deref_mut() {
                        abs_max_aux = abs_max_aux.max(out.norm());
                        aux.set(m, n, l, out * scale.aux);
                    }
                    out = epilogue.activation.apply(out);
                }

                abs_max_d = abs_max_d.max(out.norm());
                if epilogue.scale.is_some() {
                    out *= scale.d;
                }
                epilogue.d.set(m, n, l, out);
            }
        }
    }

    if let Some(target) = epilogue.dbias.as_deref_mut() {
        for (m, gradient) in dbias.into_iter().enumerate() {
            let value = target.at(m, 0, 0) + gradient;
            target.set(m, 0, 0, value);
        }
    }
    if let Some(target) = epilogue.abs_max_d.as_deref_mut() {
        update_abs_max(target, abs_max_d);
    }
    if let Some(target) = epilogue.abs_max_aux.as_deref_mut() {
        update_abs_max(target, abs_max_aux);
    }
}

fn update_abs_max(target: &mut HostTensor, value: f64) {
    let current = target.real_at(0, 0, 0);
    if value > current {
        target.set_real(0, 0, 0, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutTag, Stride};

    fn matrix(name: &'static str, rows: usize, cols: usize, values: &[f64]) -> HostTensor {
        let mut tensor = HostTensor::zeros(
            name,
            DataType::F32,
            LayoutTag::RowMajor.packed(rows, cols, 1).unwrap(),
        );
        for (index, (i, j, l)) in tensor.layout().coords().enumerate() {
            tensor.set_real(i, j, l, values[index]);
        }
        tensor
    }

    fn linear<'a>(c: &'a HostTensor, d: &'a mut HostTensor) -> EpilogueParams<'a> {
        EpilogueParams {
            c,
            d,
            alpha: ScalarView::Value(1.0),
            beta: ScalarView::Value(0.0),
            scale: None,
            bias: None,
            dbias: None,
            aux_in: None,
            aux_out: None,
            abs_max_d: None,
            abs_max_aux: None,
            activation: Activation::Identity,
        }
    }

    #[test]
    fn two_by_two() {
        let a = matrix("A", 2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = matrix("B", 2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let c = matrix("C", 2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let mut d = matrix("D", 2, 2, &[0.0; 4]);

        let mainloop = MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        };
        let mut epilogue = linear(&c, &mut d);
        epilogue.alpha = ScalarView::Value(2.0);
        epilogue.beta = ScalarView::Value(-1.0);
        gemm(&mainloop, &mut epilogue);

        assert_eq!(d.real_at(0, 0, 0), 37.0);
        assert_eq!(d.real_at(0, 1, 0), 43.0);
        assert_eq!(d.real_at(1, 0, 0), 85.0);
        assert_eq!(d.real_at(1, 1, 0), 99.0);
    }

    #[test]
    fn bias_activation_and_abs_max() {
        let a = matrix("A", 2, 1, &[1.0, -3.0]);
        let b = matrix("B", 1, 2, &[1.0, 2.0]);
        let c = matrix("C", 2, 2, &[0.0; 4]);
        let bias = {
            let mut bias = HostTensor::zeros("bias", DataType::F32, TensorLayout::vector(2));
            bias.set_real(0, 0, 0, 0.5);
            bias.set_real(1, 0, 0, 1.0);
            bias
        };
        let mut d = matrix("D", 2, 2, &[0.0; 4]);
        let mut aux = matrix("Aux", 2, 2, &[0.0; 4]);
        let mut amax_d = HostTensor::zeros("amax_D", DataType::F32, TensorLayout::scalar());
        let mut amax_aux = HostTensor::zeros("amax_Aux", DataType::F32, TensorLayout::scalar());

        let mainloop = MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        };
        let mut epilogue = linear(&c, &mut d);
        epilogue.bias = Some(&bias);
        epilogue.aux_out = Some(&mut aux);
        epilogue.abs_max_d = Some(&mut amax_d);
        epilogue.abs_max_aux = Some(&mut amax_aux);
        epilogue.scale = Some(ScaleFactors {
            d: 2.0,
            aux: 0.5,
            ..ScaleFactors::default()
        });
        epilogue.activation = Activation::Relu;
        gemm(&mainloop, &mut epilogue);

        // pre-activation: [[1.5, 2.5], [-2.0, -5.0]]
        assert_eq!(aux.real_at(0, 1, 0), 1.25);
        assert_eq!(aux.real_at(1, 1, 0), -2.5);
        assert_eq!(d.real_at(0, 1, 0), 5.0);
        assert_eq!(d.real_at(1, 0, 0), 0.0);
        assert_eq!(amax_aux.real_at(0, 0, 0), 5.0);
        assert_eq!(amax_d.real_at(0, 0, 0), 2.5);
    }

    #[test]
    fn backward_fusion_reduces_bias_gradient() {
        let a = matrix("A", 2, 1, &[1.0, 2.0]);
        let b = matrix("B", 1, 3, &[1.0, 1.0, 1.0]);
        let c = matrix("C", 2, 3, &[0.0; 6]);
        let aux = matrix("Aux", 2, 3, &[1.0, -1.0, 1.0, 1.0, 1.0, -1.0]);
        let mut d = matrix("D", 2, 3, &[0.0; 6]);
        let mut dbias = HostTensor::zeros("dBias", DataType::F32, TensorLayout::vector(2));

        let mainloop = MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        };
        let mut epilogue = linear(&c, &mut d);
        epilogue.aux_in = Some(&aux);
        epilogue.dbias = Some(&mut dbias);
        epilogue.activation = Activation::Relu;
        gemm(&mainloop, &mut epilogue);

        assert_eq!(d.real_at(0, 1, 0), 0.0);
        assert_eq!(d.real_at(1, 1, 0), 2.0);
        assert_eq!(dbias.real_at(0, 0, 0), 2.0);
        assert_eq!(dbias.real_at(1, 0, 0), 4.0);
    }

    #[test]
    fn per_batch_beta_broadcast() {
        let layout = LayoutTag::RowMajor.packed(1, 1, 2).unwrap();
        let mut a = HostTensor::zeros("A", DataType::F32, layout);
        let mut b = HostTensor::zeros("B", DataType::F32, layout);
        let mut c = HostTensor::zeros("C", DataType::F32, layout);
        a.fill(1.0);
        b.fill(1.0);
        c.fill(1.0);
        let mut d = HostTensor::zeros("D", DataType::F32, layout);

        let mut beta = HostTensor::zeros("beta", DataType::F32, TensorLayout::vector(2));
        beta.set_real(0, 0, 0, 0.0);
        beta.set_real(1, 0, 0, 1.0);

        let mainloop = MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        };
        let mut epilogue = linear(&c, &mut d);
        epilogue.beta = ScalarView::Broadcast {
            data: beta.data(),
            layout: TensorLayout::new([1, 1, 2], Stride::new(0, 0, 1)),
        };
        gemm(&mainloop, &mut epilogue);

        assert_eq!(d.real_at(0, 0, 0), 1.0);
        assert_eq!(d.real_at(0, 0, 1), 2.0);
    }

    #[test]
    fn narrow_output_saturates() {
        let a = matrix("A", 1, 1, &[1000.0]);
        let b = matrix("B", 1, 1, &[1.0]);
        let c = matrix("C", 1, 1, &[0.0]);
        let mut d = HostTensor::zeros(
            "D",
            DataType::F8E4M3,
            LayoutTag::RowMajor.packed(1, 1, 1).unwrap(),
        );
        let mainloop = MainloopParams {
            a: &a,
            b: &b,
            accumulator: DataType::F32,
        };
        gemm(&mainloop, &mut linear(&c, &mut d));
        assert_eq!(d.real_at(0, 0, 0), 448.0);
    }
}
