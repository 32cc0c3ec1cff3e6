use crate::{
    Error, Result,
    activation::Activation,
    capability::CapabilityFlags,
    compare::{Channel, ComparisonReport, EqualityPolicy},
    config::{ScalarLocation, TestbedConfig, VectorScale},
    device::{Device, DeviceError},
    distribution::seed_offset,
    kernel::{EpilogueArguments, ScalarArgument, ScaleFactorArguments, TensorArgument},
    layout::{Stride, TensorLayout},
    mainloop::set_sentinel,
    reference::{EpilogueParams, ScalarView, ScaleFactors},
    shape::ProblemShape,
    tensor::{HostTensor, MirroredTensor},
};
use std::{io, sync::Arc};

/// Shape of the alpha and beta tensors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarBroadcast {
    /// One value passed by value from the host.
    Scalar,
    /// One value per batch, read from device memory.
    PerBatch,
    /// One value per row and batch, read from device memory.
    PerRowPerBatch,
}

impl ScalarBroadcast {
    pub fn select(per_row_scale: bool, location: ScalarLocation, vector_scale: VectorScale) -> Self {
        match (per_row_scale, vector_scale, location) {
            (true, VectorScale::Enabled, _) => ScalarBroadcast::PerRowPerBatch,
            (_, _, ScalarLocation::Device) => ScalarBroadcast::PerBatch,
            (_, _, ScalarLocation::Host) => ScalarBroadcast::Scalar,
        }
    }

    /// Number of stored values, or `None` if it does not fit in `usize`.
    pub fn len(self, problem: ProblemShape) -> Option<usize> {
        match self {
            ScalarBroadcast::Scalar => Some(1),
            ScalarBroadcast::PerBatch => Some(problem.l()),
            ScalarBroadcast::PerRowPerBatch => problem.m().checked_mul(problem.l()),
        }
    }

    /// Stride of the stored values over the `(M, N, L)` output.
    pub fn stride(self, problem: ProblemShape) -> Stride {
        match self {
            ScalarBroadcast::Scalar => Stride::new(0, 0, 0),
            ScalarBroadcast::PerBatch => Stride::new(0, 0, 1),
            ScalarBroadcast::PerRowPerBatch => Stride::new(1, 0, problem.m()),
        }
    }

    /// View of the stored values over the `(M, N, L)` output.
    pub fn layout(self, problem: ProblemShape) -> TensorLayout {
        output_view(problem, self.stride(problem))
    }

    pub fn is_device_resident(self) -> bool {
        self != ScalarBroadcast::Scalar
    }
}

fn output_view(problem: ProblemShape, stride: Stride) -> TensorLayout {
    TensorLayout::new([problem.m(), problem.n(), problem.l()], stride)
}

#[derive(Debug)]
struct ScaleTensors {
    a: MirroredTensor,
    b: MirroredTensor,
    c: MirroredTensor,
    d: MirroredTensor,
    aux: Option<MirroredTensor>,
}

/// Device accumulator of a running absolute maximum and its reference value.
#[derive(Debug)]
struct AbsMax {
    device: MirroredTensor,
    reference: HostTensor,
}

/// Epilogue tensors of one test case.
///
/// Only the tensors required by the active capabilities exist; everything
/// else is `None` and costs neither host nor device memory.
#[derive(Debug)]
pub struct HostEpilogue {
    problem: ProblemShape,
    capabilities: CapabilityFlags,
    policy: EqualityPolicy,
    activation: Activation,
    broadcast: ScalarBroadcast,

    tensor_c: MirroredTensor,
    tensor_d: MirroredTensor,
    reference_d: HostTensor,
    alpha: MirroredTensor,
    beta: MirroredTensor,
    scale: Option<ScaleTensors>,
    /// Row bias input, or the bias gradient written by the kernel.
    bias: Option<MirroredTensor>,
    reference_dbias: Option<HostTensor>,
    /// Auxiliary input, or the auxiliary output written by the kernel.
    aux: Option<MirroredTensor>,
    reference_aux: Option<HostTensor>,
    abs_max_d: Option<AbsMax>,
    abs_max_aux: Option<AbsMax>,
}

impl HostEpilogue {
    pub fn initialize(
        config: &TestbedConfig,
        device: &Arc<dyn Device>,
        problem: ProblemShape,
        alpha: f64,
        beta: f64,
    ) -> Result<Self> {
        let (m, n, l) = (problem.m(), problem.n(), problem.l());
        let capabilities = config.capabilities();
        tracing::debug!(%problem, alpha, beta, ?capabilities, "initializing epilogue tensors");

        let mut c = HostTensor::packed("C", config.element_c, config.layout_c, [m, n, l])?;
        config.init_c.fill(&mut c, config.seed_for(seed_offset::C));
        set_sentinel(&mut c);
        let d = HostTensor::packed("D", config.element_d, config.layout_d, [m, n, l])?;
        let mut reference_d = HostTensor::zeros("reference D", config.element_d, *d.layout());
        reference_d.copy_from(&c);
        let tensor_c = mirror(c, device)?;
        let tensor_d = mirror(d, device)?;

        let broadcast = ScalarBroadcast::select(
            capabilities.per_row_scale,
            config.scalar_location,
            config.vector_scale,
        );
        let (alpha_tensor, beta_tensor) =
            scalars(config, capabilities, broadcast, problem, alpha, beta)?;
        let (alpha_tensor, beta_tensor) = if broadcast.is_device_resident() {
            (mirror(alpha_tensor, device)?, mirror(beta_tensor, device)?)
        } else {
            (
                MirroredTensor::host_only(alpha_tensor),
                MirroredTensor::host_only(beta_tensor),
            )
        };

        let scale_on_device = config.scalar_location == ScalarLocation::Device;
        let scale_factor = |name, offset| -> Result<MirroredTensor> {
            let mut tensor = HostTensor::zeros(name, config.element_scalar, TensorLayout::scalar());
            config.init_scale.fill(&mut tensor, config.seed_for(offset));
            if scale_on_device {
                mirror(tensor, device)
            } else {
                Ok(MirroredTensor::host_only(tensor))
            }
        };
        let scale = if capabilities.scale_factor {
            Some(ScaleTensors {
                a: scale_factor("scale_a", seed_offset::SCALE_A)?,
                b: scale_factor("scale_b", seed_offset::SCALE_B)?,
                c: scale_factor("scale_c", seed_offset::SCALE_C)?,
                d: scale_factor("scale_d", seed_offset::SCALE_D)?,
                aux: if capabilities.aux_out {
                    Some(scale_factor("scale_aux", seed_offset::SCALE_AUX)?)
                } else {
                    None
                },
            })
        } else {
            None
        };

        let (bias, reference_dbias) = if capabilities.row_bias {
            let mut bias = HostTensor::zeros("bias", config.element_bias, TensorLayout::vector(m));
            config.init_bias.fill(&mut bias, config.seed_for(seed_offset::BIAS));
            (Some(mirror(bias, device)?), None)
        } else if capabilities.de_bias {
            let bias = HostTensor::zeros("dBias", config.element_bias, TensorLayout::vector(m));
            let reference =
                HostTensor::zeros("reference dBias", config.element_bias, TensorLayout::vector(m));
            (Some(mirror(bias, device)?), Some(reference))
        } else {
            (None, None)
        };

        let (aux, reference_aux) = if capabilities.aux_in {
            let mut aux = HostTensor::packed("Aux", config.element_aux, config.layout_aux, [m, n, l])?;
            config.init_c.fill(&mut aux, config.seed_for(seed_offset::AUX));
            (Some(mirror(aux, device)?), None)
        } else if capabilities.aux_out {
            let aux = HostTensor::packed("Aux", config.element_aux, config.layout_aux, [m, n, l])?;
            let reference = HostTensor::zeros("reference Aux", config.element_aux, *aux.layout());
            (Some(mirror(aux, device)?), Some(reference))
        } else {
            (None, None)
        };

        let abs_max = |name, reference_name| -> Result<AbsMax> {
            let mut seeded = HostTensor::zeros(name, config.element_amax, TensorLayout::scalar());
            seeded.fill(config.element_amax.max_finite());
            Ok(AbsMax {
                device: mirror(seeded, device)?,
                reference: HostTensor::zeros(reference_name, config.element_amax, TensorLayout::scalar()),
            })
        };
        let abs_max_d = if capabilities.abs_max_d {
            Some(abs_max("abs_max_D", "reference abs_max_D")?)
        } else {
            None
        };
        let abs_max_aux = if capabilities.abs_max_aux {
            Some(abs_max("abs_max_Aux", "reference abs_max_Aux")?)
        } else {
            None
        };

        Ok(Self {
            problem,
            capabilities,
            policy: config.equality_policy()?,
            activation: config.activation(),
            broadcast,
            tensor_c,
            tensor_d,
            reference_d,
            alpha: alpha_tensor,
            beta: beta_tensor,
            scale,
            bias,
            reference_dbias,
            aux,
            reference_aux,
            abs_max_d,
            abs_max_aux,
        })
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn broadcast(&self) -> ScalarBroadcast {
        self.broadcast
    }

    pub fn tensor_c(&self) -> &HostTensor {
        self.tensor_c.host()
    }

    pub fn tensor_d(&self) -> &HostTensor {
        self.tensor_d.host()
    }

    /// Host copy of D, e.g. to stand in for a kernel's output.
    pub fn tensor_d_mut(&mut self) -> &mut HostTensor {
        self.tensor_d.host_mut()
    }

    pub fn reference_d(&self) -> &HostTensor {
        &self.reference_d
    }

    pub fn alpha(&self) -> &HostTensor {
        self.alpha.host()
    }

    pub fn beta(&self) -> &HostTensor {
        self.beta.host()
    }

    pub fn bias(&self) -> Option<&HostTensor> {
        self.bias.as_ref().map(MirroredTensor::host)
    }

    pub fn reference_dbias(&self) -> Option<&HostTensor> {
        self.reference_dbias.as_ref()
    }

    pub fn aux(&self) -> Option<&HostTensor> {
        self.aux.as_ref().map(MirroredTensor::host)
    }

    pub fn reference_aux(&self) -> Option<&HostTensor> {
        self.reference_aux.as_ref()
    }

    pub fn abs_max_d(&self) -> Option<(&HostTensor, &HostTensor)> {
        self.abs_max_d
            .as_ref()
            .map(|amax| (amax.device.host(), &amax.reference))
    }

    pub fn abs_max_aux(&self) -> Option<(&HostTensor, &HostTensor)> {
        self.abs_max_aux
            .as_ref()
            .map(|amax| (amax.device.host(), &amax.reference))
    }

    /// Every materialized tensor, reference tensors included.
    pub fn tensors(&self) -> Vec<&HostTensor> {
        let mut tensors = vec![
            self.tensor_c.host(),
            self.tensor_d.host(),
            &self.reference_d,
            self.alpha.host(),
            self.beta.host(),
        ];
        if let Some(scale) = &self.scale {
            tensors.extend([scale.a.host(), scale.b.host(), scale.c.host(), scale.d.host()]);
            tensors.extend(scale.aux.as_ref().map(MirroredTensor::host));
        }
        tensors.extend(self.bias.as_ref().map(MirroredTensor::host));
        tensors.extend(self.reference_dbias.as_ref());
        tensors.extend(self.aux.as_ref().map(MirroredTensor::host));
        tensors.extend(self.reference_aux.as_ref());
        for amax in [&self.abs_max_d, &self.abs_max_aux].into_iter().flatten() {
            tensors.extend([amax.device.host(), &amax.reference]);
        }
        tensors
    }

    pub fn to_args(&self) -> EpilogueArguments {
        let capabilities = self.capabilities;
        let view = self.broadcast.layout(self.problem);
        let scalar = |tensor: &MirroredTensor, layout: TensorLayout| ScalarArgument {
            value: tensor.host().real_at(0, 0, 0),
            vector: tensor.is_device_backed().then(|| TensorArgument {
                layout,
                ..tensor.argument()
            }),
        };
        let scale_view = output_view(self.problem, Stride::default());

        EpilogueArguments {
            c: self.tensor_c.argument(),
            d: self.tensor_d.argument(),
            alpha: scalar(&self.alpha, view),
            beta: scalar(&self.beta, view),
            scale: self.scale.as_ref().map(|scale| ScaleFactorArguments {
                a: scalar(&scale.a, scale_view),
                b: scalar(&scale.b, scale_view),
                c: scalar(&scale.c, scale_view),
                d: scalar(&scale.d, scale_view),
                aux: scale.aux.as_ref().map(|aux| scalar(aux, scale_view)),
            }),
            bias: self
                .bias
                .as_ref()
                .filter(|_| capabilities.row_bias)
                .map(MirroredTensor::argument),
            dbias: self
                .bias
                .as_ref()
                .filter(|_| capabilities.de_bias)
                .map(MirroredTensor::argument),
            aux_in: self
                .aux
                .as_ref()
                .filter(|_| capabilities.aux_in)
                .map(MirroredTensor::argument),
            aux_out: self
                .aux
                .as_ref()
                .filter(|_| capabilities.aux_out)
                .map(MirroredTensor::argument),
            abs_max_d: self.abs_max_d.as_ref().map(|amax| amax.device.argument()),
            abs_max_aux: self.abs_max_aux.as_ref().map(|amax| amax.device.argument()),
            activation: self.activation,
            capabilities,
        }
    }

    /// Reference view over the same tensors, writing into the reference
    /// outputs.
    pub fn to_host_args(&mut self) -> EpilogueParams<'_> {
        let capabilities = self.capabilities;
        let view = self.broadcast.layout(self.problem);
        EpilogueParams {
            c: self.tensor_c.host(),
            d: &mut self.reference_d,
            alpha: scalar_view(self.alpha.host(), self.broadcast, view),
            beta: scalar_view(self.beta.host(), self.broadcast, view),
            scale: self.scale.as_ref().map(|scale| ScaleFactors {
                a: scale.a.host().real_at(0, 0, 0),
                b: scale.b.host().real_at(0, 0, 0),
                c: scale.c.host().real_at(0, 0, 0),
                d: scale.d.host().real_at(0, 0, 0),
                aux: scale
                    .aux
                    .as_ref()
                    .map_or(1.0, |aux| aux.host().real_at(0, 0, 0)),
            }),
            bias: self
                .bias
                .as_ref()
                .filter(|_| capabilities.row_bias)
                .map(MirroredTensor::host),
            dbias: self.reference_dbias.as_mut(),
            aux_in: self
                .aux
                .as_ref()
                .filter(|_| capabilities.aux_in)
                .map(MirroredTensor::host),
            aux_out: self.reference_aux.as_mut(),
            abs_max_d: self.abs_max_d.as_mut().map(|amax| &mut amax.reference),
            abs_max_aux: self.abs_max_aux.as_mut().map(|amax| &mut amax.reference),
            activation: self.activation,
        }
    }

    /// Copies every kernel output back to the host.
    pub fn sync_outputs(&mut self) -> Result<(), DeviceError> {
        self.tensor_d.sync_host()?;
        if let Some(amax) = &mut self.abs_max_d {
            amax.device.sync_host()?;
        }
        if self.capabilities.de_bias {
            if let Some(bias) = &mut self.bias {
                bias.sync_host()?;
            }
        }
        if self.capabilities.aux_out {
            if let Some(aux) = &mut self.aux {
                aux.sync_host()?;
            }
        }
        if let Some(amax) = &mut self.abs_max_aux {
            amax.device.sync_host()?;
        }
        Ok(())
    }

    /// Compares every active output channel with its reference.
    ///
    /// All channels are checked even after one fails, so the report names
    /// every mismatching output.
    pub fn compare_reference(&self) -> ComparisonReport {
        let mut report = ComparisonReport::new();
        let d = self.tensor_d.host();

        report.expect_nonzero(self.tensor_c.host());
        if d.num_elements() > 1 {
            report.expect_nonzero(d);
        }
        if self.reference_d.num_elements() > 1 {
            report.expect_nonzero(&self.reference_d);
        }
        report.check(Channel::D, &self.policy, &self.reference_d, d);

        if let Some(amax) = &self.abs_max_d {
            report.check(Channel::AbsMaxD, &self.policy, &amax.reference, amax.device.host());
        }

        if let (Some(bias), Some(reference)) = (&self.bias, &self.reference_dbias) {
            report.expect_nonzero(bias.host());
            report.expect_nonzero(reference);
            report.check(Channel::DBias, &self.policy, reference, bias.host());
        }

        if let (Some(aux), Some(reference)) = (&self.aux, &self.reference_aux) {
            report.expect_nonzero(aux.host());
            report.expect_nonzero(reference);
            report.check(Channel::Aux, &self.policy, reference, aux.host());
            if let Some(amax) = &self.abs_max_aux {
                report.check(Channel::AbsMaxAux, &self.policy, &amax.reference, amax.device.host());
            }
        }

        report
    }

    /// Writes the epilogue tensors in diagnostic form.
    pub fn write_tensors(&self, out: &mut dyn io::Write) -> io::Result<()> {
        if let Some(scale) = &self.scale {
            writeln!(
                out,
                "scale_a: {}, scale_b: {}, scale_c: {}",
                scale.a.host().real_at(0, 0, 0),
                scale.b.host().real_at(0, 0, 0),
                scale.c.host().real_at(0, 0, 0),
            )?;
        }
        if self.capabilities.per_row_scale {
            write!(out, "\nvalpha =\n{}\nvbeta =\n{}\n", self.alpha.host(), self.beta.host())?;
        } else {
            write!(out, "\nalpha =\n{}\nbeta =\n{}\n", self.alpha.host(), self.beta.host())?;
        }

        if let Some(amax) = &self.abs_max_d {
            if let Some(scale) = &self.scale {
                writeln!(out, "scale_d: {}", scale.d.host().real_at(0, 0, 0))?;
            }
            writeln!(out, "Reference abs_max_D: {}", amax.reference.real_at(0, 0, 0))?;
            writeln!(out, "Computed abs_max_D: {}\n", amax.device.host().real_at(0, 0, 0))?;
        }
        if let Some(amax) = &self.abs_max_aux {
            if let Some(aux) = self.scale.as_ref().and_then(|scale| scale.aux.as_ref()) {
                writeln!(out, "scale_aux: {}", aux.host().real_at(0, 0, 0))?;
            }
            writeln!(out, "Reference abs_max_Aux: {}", amax.reference.real_at(0, 0, 0))?;
            writeln!(out, "Computed abs_max_Aux: {}\n", amax.device.host().real_at(0, 0, 0))?;
        }

        if let Some(bias) = &self.bias {
            if self.capabilities.row_bias {
                write!(out, "\nBias =\n{}", bias.host())?;
            }
        }
        if let Some(aux) = &self.aux {
            if self.capabilities.aux_in {
                write!(out, "\nAux Input =\n{}", aux.host())?;
            }
        }
        if let (Some(bias), Some(reference)) = (&self.bias, &self.reference_dbias) {
            write!(out, "\nReference dBias =\n{reference}\nComputed dBias =\n{}", bias.host())?;
        }
        if let (Some(aux), Some(reference)) = (&self.aux, &self.reference_aux) {
            write!(out, "\nReference Aux =\n{reference}\nComputed Aux =\n{}", aux.host())?;
        }

        write!(
            out,
            "\nC =\n{}\nReference =\n{}\nComputed =\n{}",
            self.tensor_c.host(),
            self.reference_d,
            self.tensor_d.host(),
        )
    }
}

fn mirror(tensor: HostTensor, device: &Arc<dyn Device>) -> Result<MirroredTensor> {
    let mirrored = MirroredTensor::new(tensor, device)?;
    mirrored.sync_device()?;
    Ok(mirrored)
}

fn scalar_view(tensor: &HostTensor, broadcast: ScalarBroadcast, layout: TensorLayout) -> ScalarView<'_> {
    match broadcast {
        ScalarBroadcast::Scalar => ScalarView::Value(tensor.real_at(0, 0, 0)),
        _ => ScalarView::Broadcast {
            data: tensor.data(),
            layout,
        },
    }
}

/// Host values of alpha and beta for the selected broadcast.
fn scalars(
    config: &TestbedConfig,
    capabilities: CapabilityFlags,
    broadcast: ScalarBroadcast,
    problem: ProblemShape,
    alpha: f64,
    beta: f64,
) -> Result<(HostTensor, HostTensor)> {
    let layout = broadcast
        .len(problem)
        .filter(|len| len.checked_mul(config.element_scalar.size()).is_some())
        .map(TensorLayout::vector)
        .ok_or(Error::Shape {
            name: "alpha",
            extent: [problem.m(), problem.n(), problem.l()],
        })?;
    let mut alpha_tensor = HostTensor::zeros("alpha", config.element_scalar, layout);
    let mut beta_tensor = HostTensor::zeros("beta", config.element_scalar, layout);

    if capabilities.per_row_scale && broadcast.is_device_resident() {
        config
            .init_scale
            .fill(&mut alpha_tensor, config.seed_for(seed_offset::ALPHA));
        if beta != 0.0 {
            config
                .init_scale
                .fill(&mut beta_tensor, config.seed_for(seed_offset::BETA));
        }
    } else if broadcast.is_device_resident() {
        alpha_tensor.fill(alpha);
        for l in 0..problem.l() {
            beta_tensor.set_real(l, 0, 0, beta + l as f64);
        }
    } else {
        alpha_tensor.fill(alpha);
        beta_tensor.fill(beta);
    }
    Ok((alpha_tensor, beta_tensor))
}
