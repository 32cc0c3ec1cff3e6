use crate::{
    Result,
    config::TestbedConfig,
    data_type::DataType,
    device::Device,
    distribution::seed_offset,
    kernel::MainloopArguments,
    reference::MainloopParams,
    shape::ProblemShape,
    tensor::{HostTensor, MirroredTensor},
};
use std::{io, sync::Arc};

/// Operands A and B of the GEMM, materialized on host and device.
#[derive(Debug)]
pub struct HostMainloop {
    tensor_a: MirroredTensor,
    tensor_b: MirroredTensor,
    accumulator: DataType,
}

impl HostMainloop {
    /// Allocates and fills A `(M, K, L)` and B `(K, N, L)`, then pushes both
    /// to the device.
    pub fn initialize(
        config: &TestbedConfig,
        device: &Arc<dyn Device>,
        problem: ProblemShape,
    ) -> Result<Self> {
        let (m, n, k, l) = (problem.m(), problem.n(), problem.k(), problem.l());
        tracing::debug!(%problem, "initializing mainloop operands");

        let mut a = HostTensor::packed("A", config.element_a, config.layout_a, [m, k, l])?;
        let mut b = HostTensor::packed("B", config.element_b, config.layout_b, [k, n, l])?;
        config.init_a.fill(&mut a, config.seed_for(seed_offset::A));
        config.init_b.fill(&mut b, config.seed_for(seed_offset::B));
        set_sentinel(&mut a);
        set_sentinel(&mut b);

        let tensor_a = MirroredTensor::new(a, device)?;
        let tensor_b = MirroredTensor::new(b, device)?;
        tensor_a.sync_device()?;
        tensor_b.sync_device()?;

        Ok(Self {
            tensor_a,
            tensor_b,
            accumulator: config.element_accumulator,
        })
    }

    pub fn tensor_a(&self) -> &HostTensor {
        self.tensor_a.host()
    }

    pub fn tensor_b(&self) -> &HostTensor {
        self.tensor_b.host()
    }

    pub fn to_args(&self) -> MainloopArguments {
        MainloopArguments {
            a: self.tensor_a.argument(),
            b: self.tensor_b.argument(),
            accumulator: self.accumulator,
        }
    }

    pub fn to_host_args(&self) -> MainloopParams<'_> {
        MainloopParams {
            a: self.tensor_a.host(),
            b: self.tensor_b.host(),
            accumulator: self.accumulator,
        }
    }

    pub fn write_tensors(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write!(out, "A =\n{}\n\nB =\n{}\n\n", self.tensor_a.host(), self.tensor_b.host())
    }
}

/// Forces the first logical element to exactly 1 so that no operand is
/// entirely zero.
pub(crate) fn set_sentinel(tensor: &mut HostTensor) {
    if tensor.num_elements() > 0 {
        tensor.set_real(0, 0, 0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::HostDevice, distribution::Distribution, layout::LayoutTag};

    #[test]
    fn operands_are_mirrored_with_sentinel() {
        let host_device = Arc::new(HostDevice::new());
        let device: Arc<dyn Device> = host_device.clone();
        let config = TestbedConfig::builder()
            .init_inputs(Distribution::Gaussian, Distribution::Identity, Distribution::Uniform)
            .build()
            .unwrap();
        let problem = ProblemShape::new(8, 4, 6, 2).unwrap();
        let mainloop = HostMainloop::initialize(&config, &device, problem).unwrap();

        assert_eq!(mainloop.tensor_a().layout().extent(), [8, 6, 2]);
        assert_eq!(mainloop.tensor_b().layout().extent(), [6, 4, 2]);
        assert_eq!(mainloop.tensor_a().real_at(0, 0, 0), 1.0);
        assert_eq!(mainloop.tensor_b().real_at(0, 0, 0), 1.0);
        assert_eq!(host_device.allocated_bytes(), (8 * 6 + 6 * 4) * 2 * 4);

        let args = mainloop.to_args();
        assert!(!args.a.ptr.is_null());
        assert_eq!(args.a.layout, *mainloop.tensor_a().layout());
        assert_eq!(args.b.layout.stride(), LayoutTag::ColumnMajor.packed(6, 4, 2).unwrap().stride());
    }

    #[test]
    fn empty_reduction_has_no_operand_storage() {
        let device: Arc<dyn Device> = Arc::new(HostDevice::new());
        let config = TestbedConfig::default();
        let mainloop = HostMainloop::initialize(&config, &device, ProblemShape::mnk(4, 4, 0)).unwrap();
        assert_eq!(mainloop.tensor_a().num_elements(), 0);
        assert!(mainloop.to_args().a.ptr.is_null());
    }
}
