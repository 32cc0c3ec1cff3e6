//! Launch arguments and the interface of a GEMM kernel under test.

use crate::{
    activation::Activation,
    capability::CapabilityFlags,
    data_type::DataType,
    device::DevicePtr,
    layout::{Stride, TensorLayout},
    shape::ProblemShape,
};
use std::fmt;

mod emulated;

pub use emulated::{EmulatedGemm, Fault};

/// Status reported by each stage of a kernel launch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KernelStatus {
    Success,
    ErrorMisalignedOperand,
    ErrorInvalidProblem,
    ErrorNotSupported,
    ErrorWorkspaceNull,
    ErrorArchMismatch,
    ErrorInternal,
}

impl KernelStatus {
    pub fn is_success(self) -> bool {
        self == KernelStatus::Success
    }
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KernelStatus::Success => "success",
            KernelStatus::ErrorMisalignedOperand => "misaligned operand",
            KernelStatus::ErrorInvalidProblem => "invalid problem",
            KernelStatus::ErrorNotSupported => "not supported",
            KernelStatus::ErrorWorkspaceNull => "workspace is null",
            KernelStatus::ErrorArchMismatch => "architecture mismatch",
            KernelStatus::ErrorInternal => "internal error",
        })
    }
}

/// Device tensor as seen by a kernel: address, element type and layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TensorArgument {
    pub ptr: DevicePtr,
    pub data_type: DataType,
    pub layout: TensorLayout,
}

/// A scalar passed by value, optionally overridden by values read through a
/// device pointer.
///
/// When `vector` is present its layout spans the full `(M, N, L)` output
/// extent with zero strides in the broadcast modes, so a kernel reads the
/// value for output `(m, n, l)` at `layout.offset(m, n, l)`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScalarArgument {
    pub value: f64,
    pub vector: Option<TensorArgument>,
}

impl ScalarArgument {
    pub fn stride(&self) -> Stride {
        self.vector.map_or(Stride::default(), |v| v.layout.stride())
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MainloopArguments {
    /// `(M, K, L)`
    pub a: TensorArgument,
    /// `(K, N, L)`
    pub b: TensorArgument,
    pub accumulator: DataType,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScaleFactorArguments {
    pub a: ScalarArgument,
    pub b: ScalarArgument,
    pub c: ScalarArgument,
    pub d: ScalarArgument,
    /// Only present with auxiliary output.
    pub aux: Option<ScalarArgument>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EpilogueArguments {
    pub c: TensorArgument,
    pub d: TensorArgument,
    pub alpha: ScalarArgument,
    pub beta: ScalarArgument,
    pub scale: Option<ScaleFactorArguments>,
    /// Per-row bias added to the output.
    pub bias: Option<TensorArgument>,
    /// Per-row bias gradient written by the kernel.
    pub dbias: Option<TensorArgument>,
    pub aux_in: Option<TensorArgument>,
    pub aux_out: Option<TensorArgument>,
    pub abs_max_d: Option<TensorArgument>,
    pub abs_max_aux: Option<TensorArgument>,
    pub activation: Activation,
    pub capabilities: CapabilityFlags,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GemmArguments {
    pub problem_shape: ProblemShape,
    pub mainloop: MainloopArguments,
    pub epilogue: EpilogueArguments,
}

/// A GEMM kernel with a fused epilogue, launched in stages.
pub trait GemmKernel {
    /// Whether the kernel supports this problem and argument set. A non-success
    /// status means the configuration is skipped, not failed.
    fn can_implement(&self, args: &GemmArguments) -> KernelStatus;

    /// Scratch bytes needed by [`initialize`](Self::initialize).
    fn workspace_size(&self, args: &GemmArguments) -> usize;

    fn initialize(&mut self, args: &GemmArguments, workspace: DevicePtr) -> KernelStatus;

    /// Launches the kernel. Completion is only guaranteed after a device-wide
    /// synchronize.
    fn run(&mut self) -> KernelStatus;
}
