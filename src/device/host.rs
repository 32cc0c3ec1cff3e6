use crate::device::{Device, DeviceError, DevicePtr};
use parking_lot::Mutex;
use slotmap::{Key, KeyData, SlotMap};

slotmap::new_key_type! {
    struct BufferKey;
}

/// Device whose memory lives in host RAM.
///
/// Used to run the verification protocol without an accelerator. Keeps
/// allocation statistics so tests can observe exactly how much device memory
/// a configuration requests, and can inject a fault into the next
/// synchronization.
#[derive(Default)]
pub struct HostDevice {
    state: Mutex<State>,
    capacity: Option<usize>,
}

#[derive(Default)]
struct State {
    buffers: SlotMap<BufferKey, Vec<u8>>,
    allocated_bytes: usize,
    total_allocations: usize,
    pending_error: Option<DeviceError>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that fails allocations once `capacity` bytes are in use.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Bytes currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated_bytes
    }

    /// Number of allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of successful allocations since creation.
    pub fn total_allocations(&self) -> usize {
        self.state.lock().total_allocations
    }

    /// Makes the next call to [`Device::synchronize`] fail with `error`.
    pub fn fail_next_synchronize(&self, error: DeviceError) {
        self.state.lock().pending_error = Some(error);
    }

    fn key(ptr: DevicePtr) -> BufferKey {
        KeyData::from_ffi(ptr.0).into()
    }
}

impl Device for HostDevice {
    fn alloc(&self, len: usize) -> Result<DevicePtr, DeviceError> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            let available = capacity.saturating_sub(state.allocated_bytes);
            if len > available {
                return Err(DeviceError::OutOfMemory {
                    requested: len,
                    available,
                });
            }
        }

        let key = state.buffers.insert(vec![0u8; len]);
        state.allocated_bytes += len;
        state.total_allocations += 1;
        tracing::trace!(len, "host device allocation");
        Ok(DevicePtr(key.data().as_ffi()))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .remove(Self::key(ptr))
            .ok_or(DeviceError::InvalidPointer(ptr))?;
        state.allocated_bytes -= buffer.len();
        Ok(())
    }

    fn copy_htod(&self, src: &[u8], dst: DevicePtr) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let buffer = state
            .buffers
            .get_mut(Self::key(dst))
            .ok_or(DeviceError::InvalidPointer(dst))?;
        if buffer.len() != src.len() {
            return Err(DeviceError::SizeMismatch {
                len: src.len(),
                allocation: buffer.len(),
            });
        }
        buffer.copy_from_slice(src);
        Ok(())
    }

    fn copy_dtoh(&self, src: DevicePtr, dst: &mut [u8]) -> Result<(), DeviceError> {
        let state = self.state.lock();
        let buffer = state
            .buffers
            .get(Self::key(src))
            .ok_or(DeviceError::InvalidPointer(src))?;
        if buffer.len() != dst.len() {
            return Err(DeviceError::SizeMismatch {
                len: dst.len(),
                allocation: buffer.len(),
            });
        }
        dst.copy_from_slice(buffer);
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        match self.state.lock().pending_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_round_trip() {
        let device = HostDevice::new();
        let ptr = device.alloc(4).unwrap();
        device.copy_htod(&[1, 2, 3, 4], ptr).unwrap();

        let mut out = [0u8; 4];
        device.copy_dtoh(ptr, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        device.free(ptr).unwrap();
        assert_eq!(device.free(ptr), Err(DeviceError::InvalidPointer(ptr)));
    }

    #[test]
    fn capacity_is_enforced() {
        let device = HostDevice::with_capacity(100);
        let first = device.alloc(60).unwrap();
        assert_eq!(
            device.alloc(60),
            Err(DeviceError::OutOfMemory {
                requested: 60,
                available: 40
            })
        );
        device.free(first).unwrap();
        device.alloc(60).unwrap();
        assert_eq!(device.total_allocations(), 2);
    }

    #[test]
    fn null_pointer_is_invalid() {
        let device = HostDevice::new();
        let mut out = [0u8; 1];
        assert_eq!(
            device.copy_dtoh(DevicePtr::NULL, &mut out),
            Err(DeviceError::InvalidPointer(DevicePtr::NULL))
        );
    }

    #[test]
    fn injected_synchronize_error_fires_once() {
        let device = HostDevice::new();
        device.fail_next_synchronize(DeviceError::Fault("illegal address".into()));
        assert!(device.synchronize().unwrap_err().is_fatal());
        device.synchronize().unwrap();
    }
}
