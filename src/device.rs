//! Device memory boundary of the test bed.
//!
//! The harness only needs to allocate, copy and synchronize; kernels receive
//! raw [`DevicePtr`]s inside their arguments, just as they would on a GPU.

use std::sync::Arc;

#[cfg(feature = "cuda")]
mod cuda;
mod host;

#[cfg(feature = "cuda")]
pub use cuda::CudaDevice;
pub use host::HostDevice;

/// Opaque device address. Zero is the null pointer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("invalid device pointer {0:?}")]
    InvalidPointer(DevicePtr),
    #[error("copy of {len} bytes does not match allocation of {allocation} bytes")]
    SizeMismatch { len: usize, allocation: usize },
    /// Unrecoverable fault, e.g. an illegal memory access inside a kernel.
    #[error("device fault: {0}")]
    Fault(String),
    #[error("device error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Faults leave the device in an undefined state; the process should
    /// not continue running test cases on it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Fault(_))
    }
}

/// Memory and synchronization interface of an accelerator.
pub trait Device: Send + Sync {
    fn alloc(&self, len: usize) -> Result<DevicePtr, DeviceError>;

    fn free(&self, ptr: DevicePtr) -> Result<(), DeviceError>;

    /// Copies `src` into the allocation at `dst`. The lengths must match.
    fn copy_htod(&self, src: &[u8], dst: DevicePtr) -> Result<(), DeviceError>;

    /// Copies the allocation at `src` into `dst`. The lengths must match.
    fn copy_dtoh(&self, src: DevicePtr, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Blocks until all previously issued work has completed.
    fn synchronize(&self) -> Result<(), DeviceError>;
}

/// Owned device allocation, freed on drop.
pub struct DeviceBuffer {
    device: Arc<dyn Device>,
    ptr: DevicePtr,
    len: usize,
}

impl DeviceBuffer {
    /// Allocates `len` bytes. Zero-length buffers do not touch the device
    /// and hold the null pointer.
    pub fn new(device: &Arc<dyn Device>, len: usize) -> Result<Self, DeviceError> {
        let ptr = if len == 0 {
            DevicePtr::NULL
        } else {
            device.alloc(len)?
        };
        Ok(Self {
            device: Arc::clone(device),
            ptr,
            len,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn upload(&self, src: &[u8]) -> Result<(), DeviceError> {
        if src.len() != self.len {
            return Err(DeviceError::SizeMismatch {
                len: src.len(),
                allocation: self.len,
            });
        }
        if self.len == 0 {
            return Ok(());
        }
        self.device.copy_htod(src, self.ptr)
    }

    pub fn download(&self, dst: &mut [u8]) -> Result<(), DeviceError> {
        if dst.len() != self.len {
            return Err(DeviceError::SizeMismatch {
                len: dst.len(),
                allocation: self.len,
            });
        }
        if self.len == 0 {
            return Ok(());
        }
        self.device.copy_dtoh(self.ptr, dst)
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(e) = self.device.free(self.ptr) {
            tracing::warn!(ptr = ?self.ptr, error = %e, "failed to free device buffer");
        }
    }
}
