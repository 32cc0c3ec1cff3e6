use crate::{data_type::DataType, device::DeviceError};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("tensor `{name}` with extent {extent:?} cannot be represented")]
    Shape {
        name: &'static str,
        extent: [usize; 3],
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Errors detected while validating a [`TestbedConfig`](crate::TestbedConfig),
/// before any tensor is allocated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("stride {stride:?} of operand {operand} is neither row- nor column-major")]
    UnsupportedStride {
        operand: &'static str,
        stride: [usize; 3],
    },
    #[error("unknown operand `{0}`, expected one of A, B, C, D, Aux")]
    UnknownOperand(&'static str),
    #[error("per-row bias and bias gradient cannot share the bias tensor")]
    RowBiasWithDeBias,
    #[error("auxiliary input and auxiliary output cannot share the aux tensor")]
    AuxInWithAuxOut,
    #[error("complex element type {0:?} only supports a plain linear combination epilogue")]
    ComplexEpilogue(DataType),
    #[error("batch count must be at least 1")]
    ZeroBatch,
    #[error("relative epsilon must be finite and non-negative, got {0}")]
    InvalidEpsilon(f64),
}
