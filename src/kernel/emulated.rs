use crate::{
    device::{Device, DeviceError, DevicePtr},
    kernel::{GemmArguments, GemmKernel, KernelStatus, ScalarArgument, TensorArgument},
    reference::{self, EpilogueParams, MainloopParams, ScalarView, ScaleFactors},
    tensor::HostTensor,
};
use num_complex::Complex64;
use std::sync::Arc;

/// Deliberate defect injected into an [`EmulatedGemm`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Fault {
    /// Adds `delta` to the D element at storage index `index`.
    PerturbD { index: usize, delta: f64 },
    /// Leaves abs-max accumulators at their seeded value instead of
    /// resetting them before the reduction.
    StaleAbsMax,
    /// Rejects every problem in `can_implement`.
    Unsupported,
    /// Fails the launch.
    FailRun,
}

/// Kernel that evaluates the GEMM and its epilogue on the host, reading and
/// writing operands through device memory like a real launch would.
pub struct EmulatedGemm {
    device: Arc<dyn Device>,
    faults: Vec<Fault>,
    workspace_size: usize,
    args: Option<GemmArguments>,
}

impl EmulatedGemm {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            faults: Vec::new(),
            workspace_size: 0,
            args: None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Requests a scratch workspace of `bytes` bytes.
    pub fn with_workspace(mut self, bytes: usize) -> Self {
        self.workspace_size = bytes;
        self
    }

    fn has_fault(&self, fault: Fault) -> bool {
        self.faults.contains(&fault)
    }

    fn download(&self, name: &'static str, arg: &TensorArgument) -> Result<HostTensor, DeviceError> {
        let mut tensor = HostTensor::zeros(name, arg.data_type, arg.layout);
        if tensor.num_elements() > 0 && !arg.ptr.is_null() {
            self.device
                .copy_dtoh(arg.ptr, tensor.data_mut().as_bytes_mut())?;
        }
        Ok(tensor)
    }

    fn upload(&self, arg: &TensorArgument, tensor: &HostTensor) -> Result<(), DeviceError> {
        if tensor.num_elements() > 0 && !arg.ptr.is_null() {
            self.device.copy_htod(tensor.data().as_bytes(), arg.ptr)?;
        }
        Ok(())
    }

    fn download_opt(
        &self,
        name: &'static str,
        arg: &Option<TensorArgument>,
    ) -> Result<Option<HostTensor>, DeviceError> {
        arg.as_ref().map(|arg| self.download(name, arg)).transpose()
    }

    fn scalar(&self, arg: &ScalarArgument) -> Result<Option<HostTensor>, DeviceError> {
        self.download_opt("scalar", &arg.vector)
    }

    fn execute(&self, args: &GemmArguments) -> Result<(), DeviceError> {
        let epilogue = &args.epilogue;
        let a = self.download("A", &args.mainloop.a)?;
        let b = self.download("B", &args.mainloop.b)?;
        let c = self.download("C", &epilogue.c)?;
        let mut d = HostTensor::zeros("D", epilogue.d.data_type, epilogue.d.layout);

        let alpha = self.scalar(&epilogue.alpha)?;
        let beta = self.scalar(&epilogue.beta)?;
        let scale = match &epilogue.scale {
            Some(scale) => {
                let value = |arg: &ScalarArgument| -> Result<f64, DeviceError> {
                    Ok(match self.scalar(arg)? {
                        Some(tensor) if tensor.num_elements() > 0 => tensor.data().get(0).re,
                        _ => arg.value,
                    })
                };
                Some(ScaleFactors {
                    a: value(&scale.a)?,
                    b: value(&scale.b)?,
                    c: value(&scale.c)?,
                    d: value(&scale.d)?,
                    aux: scale.aux.as_ref().map(value).transpose()?.unwrap_or(1.0),
                })
            }
            None => None,
        };

        let bias = self.download_opt("bias", &epilogue.bias)?;
        let mut dbias = self.download_opt("dBias", &epilogue.dbias)?;
        let aux_in = self.download_opt("Aux", &epilogue.aux_in)?;
        let mut aux_out = epilogue
            .aux_out
            .map(|arg| HostTensor::zeros("Aux", arg.data_type, arg.layout));
        let stale = self.has_fault(Fault::StaleAbsMax);
        let abs_max = |arg: &TensorArgument| -> Result<HostTensor, DeviceError> {
            if stale {
                self.download("abs_max", arg)
            } else {
                Ok(HostTensor::zeros("abs_max", arg.data_type, arg.layout))
            }
        };
        let mut abs_max_d = epilogue.abs_max_d.as_ref().map(abs_max).transpose()?;
        let mut abs_max_aux = epilogue.abs_max_aux.as_ref().map(abs_max).transpose()?;

        reference::gemm(
            &MainloopParams {
                a: &a,
                b: &b,
                accumulator: args.mainloop.accumulator,
            },
            &mut EpilogueParams {
                c: &c,
                d: &mut d,
                alpha: scalar_view(&epilogue.alpha, alpha.as_ref()),
                beta: scalar_view(&epilogue.beta, beta.as_ref()),
                scale,
                bias: bias.as_ref(),
                dbias: dbias.as_mut(),
                aux_in: aux_in.as_ref(),
                aux_out: aux_out.as_mut(),
                abs_max_d: abs_max_d.as_mut(),
                abs_max_aux: abs_max_aux.as_mut(),
                activation: epilogue.activation,
            },
        );

        for fault in &self.faults {
            if let Fault::PerturbD { index, delta } = *fault {
                if index < d.data().len() {
                    let value = d.data().get(index) + Complex64::new(delta, 0.0);
                    d.data_mut().set(index, value);
                }
            }
        }

        self.upload(&epilogue.d, &d)?;
        let outputs = [
            (epilogue.dbias, dbias),
            (epilogue.aux_out, aux_out),
            (epilogue.abs_max_d, abs_max_d),
            (epilogue.abs_max_aux, abs_max_aux),
        ];
        for (arg, tensor) in outputs {
            if let (Some(arg), Some(tensor)) = (arg, tensor) {
                self.upload(&arg, &tensor)?;
            }
        }
        Ok(())
    }
}

fn scalar_view<'a>(arg: &ScalarArgument, tensor: Option<&'a HostTensor>) -> ScalarView<'a> {
    match (arg.vector, tensor) {
        (Some(vector), Some(tensor)) => ScalarView::Broadcast {
            data: tensor.data(),
            layout: vector.layout,
        },
        _ => ScalarView::Value(arg.value),
    }
}

impl GemmKernel for EmulatedGemm {
    fn can_implement(&self, args: &GemmArguments) -> KernelStatus {
        if self.has_fault(Fault::Unsupported) {
            return KernelStatus::ErrorNotSupported;
        }
        let problem = args.problem_shape;
        let mainloop = &args.mainloop;
        if mainloop.a.layout.extent() != [problem.m(), problem.k(), problem.l()]
            || mainloop.b.layout.extent() != [problem.k(), problem.n(), problem.l()]
            || args.epilogue.d.layout.extent() != [problem.m(), problem.n(), problem.l()]
        {
            return KernelStatus::ErrorInvalidProblem;
        }
        KernelStatus::Success
    }

    fn workspace_size(&self, _args: &GemmArguments) -> usize {
        self.workspace_size
    }

    fn initialize(&mut self, args: &GemmArguments, workspace: DevicePtr) -> KernelStatus {
        if self.workspace_size > 0 && workspace.is_null() {
            return KernelStatus::ErrorWorkspaceNull;
        }
        self.args = Some(*args);
        KernelStatus::Success
    }

    fn run(&mut self) -> KernelStatus {
        let Some(args) = self.args else {
            return KernelStatus::ErrorInternal;
        };
        if self.has_fault(Fault::FailRun) {
            return KernelStatus::ErrorInternal;
        }
        match self.execute(&args) {
            Ok(()) => KernelStatus::Success,
            Err(error) => {
                tracing::warn!(%error, "emulated kernel failed to access device memory");
                KernelStatus::ErrorInternal
            }
        }
    }
}
