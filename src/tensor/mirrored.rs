use crate::{
    device::{Device, DeviceBuffer, DeviceError, DevicePtr},
    kernel::TensorArgument,
    tensor::HostTensor,
};
use std::sync::Arc;

/// A host tensor paired with an optional device copy of the same size.
///
/// The two copies are never kept coherent implicitly: callers push host data
/// with [`sync_device`](Self::sync_device) before a launch and pull results
/// with [`sync_host`](Self::sync_host) afterwards.
#[derive(Debug)]
pub struct MirroredTensor {
    host: HostTensor,
    device: Option<DeviceBuffer>,
}

impl MirroredTensor {
    /// Allocates a device copy sized like `host`. Does not copy any data.
    pub fn new(host: HostTensor, device: &Arc<dyn Device>) -> Result<Self, DeviceError> {
        let buffer = DeviceBuffer::new(device, host.size_in_bytes())?;
        Ok(Self {
            host,
            device: Some(buffer),
        })
    }

    /// Tensor that only exists on the host, e.g. a scalar passed by value.
    pub fn host_only(host: HostTensor) -> Self {
        Self { host, device: None }
    }

    pub fn host(&self) -> &HostTensor {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostTensor {
        &mut self.host
    }

    pub fn is_device_backed(&self) -> bool {
        self.device.is_some()
    }

    /// Device address, or null for host-only tensors.
    pub fn device_ptr(&self) -> DevicePtr {
        self.device
            .as_ref()
            .map_or(DevicePtr::NULL, DeviceBuffer::ptr)
    }

    /// Bytes held on the device.
    pub fn device_len(&self) -> usize {
        self.device.as_ref().map_or(0, DeviceBuffer::len)
    }

    /// Copies host contents to the device. No-op for host-only tensors.
    pub fn sync_device(&self) -> Result<(), DeviceError> {
        match &self.device {
            Some(buffer) => buffer.upload(self.host.data().as_bytes()),
            None => Ok(()),
        }
    }

    /// Copies device contents back to the host. No-op for host-only tensors.
    pub fn sync_host(&mut self) -> Result<(), DeviceError> {
        match &self.device {
            Some(buffer) => buffer.download(self.host.data_mut().as_bytes_mut()),
            None => Ok(()),
        }
    }

    /// Describes the device copy for kernel arguments, using the host layout.
    pub fn argument(&self) -> TensorArgument {
        TensorArgument {
            ptr: self.device_ptr(),
            data_type: self.host.data_type(),
            layout: *self.host.layout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_type::DataType, device::HostDevice, layout::TensorLayout};

    #[test]
    fn explicit_synchronization() {
        let host_device = Arc::new(HostDevice::new());
        let device: Arc<dyn Device> = host_device.clone();

        let mut tensor = MirroredTensor::new(
            HostTensor::zeros("bias", DataType::F32, TensorLayout::vector(4)),
            &device,
        )
        .unwrap();
        assert_eq!(host_device.allocated_bytes(), 16);

        tensor.host_mut().fill(3.0);
        tensor.sync_device().unwrap();
        tensor.host_mut().fill(0.0);
        assert_eq!(tensor.host().real_at(2, 0, 0), 0.0);

        tensor.sync_host().unwrap();
        assert_eq!(tensor.host().real_at(2, 0, 0), 3.0);
    }

    #[test]
    fn host_only_tensors_have_no_device_copy() {
        let mut tensor =
            MirroredTensor::host_only(HostTensor::zeros("alpha", DataType::F32, TensorLayout::scalar()));
        assert!(!tensor.is_device_backed());
        assert!(tensor.device_ptr().is_null());
        tensor.sync_device().unwrap();
        tensor.sync_host().unwrap();
    }
}
