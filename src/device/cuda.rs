use crate::device::{Device, DeviceError, DevicePtr};
use cudarc::driver::{CudaContext, DriverError, result, sys::CUresult};
use std::sync::Arc;

/// CUDA device driven through the driver API.
pub struct CudaDevice {
    context: Arc<CudaContext>,
}

impl CudaDevice {
    pub fn new(ordinal: usize) -> Result<Self, DeviceError> {
        let context = CudaContext::new(ordinal)?;
        Ok(Self { context })
    }

    pub fn context(&self) -> &Arc<CudaContext> {
        &self.context
    }
}

impl From<DriverError> for DeviceError {
    fn from(error: DriverError) -> Self {
        match error.0 {
            CUresult::CUDA_ERROR_OUT_OF_MEMORY => DeviceError::OutOfMemory {
                requested: 0,
                available: 0,
            },
            CUresult::CUDA_ERROR_ILLEGAL_ADDRESS
            | CUresult::CUDA_ERROR_ILLEGAL_INSTRUCTION
            | CUresult::CUDA_ERROR_MISALIGNED_ADDRESS
            | CUresult::CUDA_ERROR_LAUNCH_FAILED => DeviceError::Fault(error.to_string()),
            _ => DeviceError::Other(error.to_string()),
        }
    }
}

impl Device for CudaDevice {
    fn alloc(&self, len: usize) -> Result<DevicePtr, DeviceError> {
        self.context.bind_to_thread()?;
        let ptr = unsafe { result::malloc_sync(len) }.map_err(|e| match DeviceError::from(e) {
            DeviceError::OutOfMemory { .. } => DeviceError::OutOfMemory {
                requested: len,
                available: 0,
            },
            other => other,
        })?;
        Ok(DevicePtr(ptr))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DeviceError> {
        self.context.bind_to_thread()?;
        unsafe { result::free_sync(ptr.0)? };
        Ok(())
    }

    fn copy_htod(&self, src: &[u8], dst: DevicePtr) -> Result<(), DeviceError> {
        self.context.bind_to_thread()?;
        unsafe { result::memcpy_htod_sync(dst.0, src)? };
        Ok(())
    }

    fn copy_dtoh(&self, src: DevicePtr, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.context.bind_to_thread()?;
        unsafe { result::memcpy_dtoh_sync(dst, src.0)? };
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.context.synchronize()?;
        Ok(())
    }
}
