//! Verification harness for GEMM kernels with fused epilogues.
//!
//! A [`Testbed`] materializes the operands a fusion needs, launches a
//! [`GemmKernel`] on them, recomputes every output on the host and compares
//! the two.

pub mod activation;
pub mod capability;
pub mod compare;
pub mod config;
pub mod data_type;
pub mod device;
pub mod distribution;
pub mod dump;
pub mod epilogue;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod mainloop;
pub mod reference;
mod shape;
pub mod tensor;
mod testbed;

#[doc(inline)]
pub use self::{
    activation::Activation,
    capability::{CapabilityFlags, FusionOperation},
    compare::{Channel, CheckEquality, ComparisonReport, EqualityPolicy},
    config::{ScalarLocation, TestbedConfig, VectorScale},
    data_type::{DataType, Element},
    device::{Device, DeviceError, HostDevice},
    distribution::Distribution,
    epilogue::ScalarBroadcast,
    error::{ConfigError, Error},
    kernel::{EmulatedGemm, Fault, GemmArguments, GemmKernel, KernelStatus},
    layout::{LayoutTag, TensorLayout},
    shape::ProblemShape,
    tensor::{HostTensor, MirroredTensor},
    testbed::{RunOutcome, Stage, TestCase, Testbed},
};
#[cfg(feature = "cuda")]
pub use device::CudaDevice;
/// Re-export of half-precision floating point types
/// from the `half` crate.
pub use half::{bf16, f16};

pub type Result<T, E = Error> = std::result::Result<T, E>;
