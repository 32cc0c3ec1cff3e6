use crate::tensor::HostTensor;
use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

/// Seed offsets added to the base seed, one per materialized tensor, so that
/// every tensor draws from an independent but reproducible stream.
pub mod seed_offset {
    pub const C: u64 = 2020;
    pub const B: u64 = 2021;
    pub const A: u64 = 2022;
    pub const ALPHA: u64 = 2023;
    pub const BETA: u64 = 2024;
    pub const BIAS: u64 = 2023;
    pub const AUX: u64 = 2023;
    pub const SCALE_A: u64 = 2023;
    pub const SCALE_B: u64 = 2024;
    pub const SCALE_C: u64 = 2025;
    pub const SCALE_D: u64 = 2026;
    pub const SCALE_AUX: u64 = 2027;
}

/// Base seed used when none is configured.
pub const DEFAULT_SEED: u64 = 4096;

/// How a tensor is filled before a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    /// Integers drawn uniformly from a range that depends on the element width.
    #[default]
    Uniform,
    /// Normal distribution with mean 0 and standard deviation 0.5.
    Gaussian,
    /// Ones on the diagonal of every batch, zeros elsewhere.
    Identity,
    /// Each storage element holds its own index.
    Sequential,
    AllOnes,
}

const GAUSSIAN_STDDEV: f64 = 0.5;

impl Distribution {
    /// Fills `tensor` deterministically from `seed`.
    pub fn fill(self, tensor: &mut HostTensor, seed: u64) {
        tracing::trace!(tensor = tensor.name(), distribution = ?self, seed, "filling tensor");
        let mut rng = Pcg64::seed_from_u64(seed);
        let complex = tensor.data_type().is_complex();
        let len = tensor.data().len();

        match self {
            Distribution::Uniform => {
                let (min, max) = uniform_range(tensor.data_type().size_in_bits());
                let mut draw = || rng.random_range(min..max).round();
                for index in 0..len {
                    let re = draw();
                    let im = if complex { draw() } else { 0.0 };
                    tensor.data_mut().set(index, Complex64::new(re, im));
                }
            }
            Distribution::Gaussian => {
                let mut draw = || GAUSSIAN_STDDEV * rng.sample::<f64, _>(StandardNormal);
                for index in 0..len {
                    let re = draw();
                    let im = if complex { draw() } else { 0.0 };
                    tensor.data_mut().set(index, Complex64::new(re, im));
                }
            }
            Distribution::Identity => {
                tensor.fill(0.0);
                let [rows, cols, batch] = tensor.layout().extent();
                for l in 0..batch {
                    for i in 0..rows.min(cols) {
                        tensor.set_real(i, i, l, 1.0);
                    }
                }
            }
            Distribution::Sequential => {
                for index in 0..len {
                    tensor.data_mut().set(index, Complex64::new(index as f64, 0.0));
                }
            }
            Distribution::AllOnes => tensor.fill(1.0),
        }
    }
}

/// Range of uniform draws for an element with `bits` bits. Draws are rounded
/// to the nearest integer, half away from zero, so both bounds occur.
fn uniform_range(bits: usize) -> (f64, f64) {
    match bits {
        1 => (0.0, 2.0),
        2..=8 => (-1.0, 1.0),
        _ => (-4.0, 4.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_type::DataType, layout::LayoutTag};
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn matrix(data_type: DataType) -> HostTensor {
        HostTensor::zeros("A", data_type, LayoutTag::RowMajor.packed(8, 6, 2).unwrap())
    }

    #[rstest]
    fn same_seed_same_contents(
        #[values(
            Distribution::Uniform,
            Distribution::Gaussian,
            Distribution::Identity,
            Distribution::Sequential,
            Distribution::AllOnes
        )]
        distribution: Distribution,
        #[values(DataType::F32, DataType::F16, DataType::F8E4M3, DataType::C32)] data_type: DataType,
    ) {
        let mut first = matrix(data_type);
        let mut second = matrix(data_type);
        distribution.fill(&mut first, 4096 + 2022);
        distribution.fill(&mut second, 4096 + 2022);
        assert_eq!(first.data().as_bytes(), second.data().as_bytes());
    }

    #[test]
    fn seed_offsets_give_distinct_streams() {
        let mut a = matrix(DataType::F32);
        let mut b = matrix(DataType::F32);
        Distribution::Gaussian.fill(&mut a, DEFAULT_SEED + seed_offset::A);
        Distribution::Gaussian.fill(&mut b, DEFAULT_SEED + seed_offset::B);
        assert_ne!(a.data(), b.data());
    }

    fn histogram(tensor: &HostTensor) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for (i, j, l) in tensor.layout().coords() {
            let value = tensor.real_at(i, j, l);
            assert_eq!(value, value.round());
            *counts.entry(value as i64).or_default() += 1;
        }
        counts
    }

    #[rstest]
    fn uniform_covers_closed_integer_range(
        #[values(
            (DataType::F32, 4),
            (DataType::F16, 4),
            (DataType::I32, 4),
            (DataType::F8E4M3, 1),
            (DataType::F8E5M2, 1),
            (DataType::I8, 1)
        )]
        case: (DataType, i64),
    ) {
        let (data_type, bound) = case;
        let mut tensor = HostTensor::zeros(
            "A",
            data_type,
            LayoutTag::RowMajor.packed(64, 64, 1).unwrap(),
        );
        Distribution::Uniform.fill(&mut tensor, DEFAULT_SEED + seed_offset::A);

        let counts = histogram(&tensor);
        let values: Vec<i64> = counts.keys().copied().collect();
        assert_eq!(values, (-bound..=bound).collect::<Vec<_>>(), "{data_type:?}");
    }

    #[test]
    fn uniform_narrow_types_are_mostly_nonzero() {
        let mut tensor = HostTensor::zeros(
            "A",
            DataType::F8E4M3,
            LayoutTag::RowMajor.packed(32, 32, 1).unwrap(),
        );
        Distribution::Uniform.fill(&mut tensor, DEFAULT_SEED + seed_offset::A);
        let zeros = histogram(&tensor)[&0];
        assert!(zeros < 32 * 32 * 3 / 4, "{zeros} zeros");
    }

    #[test]
    fn identity_per_batch() {
        let mut tensor = matrix(DataType::F32);
        Distribution::Identity.fill(&mut tensor, 0);
        assert_eq!(tensor.real_at(3, 3, 1), 1.0);
        assert_eq!(tensor.real_at(3, 4, 1), 0.0);
        assert_eq!(tensor.real_at(7, 5, 0), 0.0);
    }

    #[test]
    fn sequential_follows_storage_order() {
        let mut tensor = HostTensor::zeros(
            "B",
            DataType::I32,
            LayoutTag::ColumnMajor.packed(3, 2, 1).unwrap(),
        );
        Distribution::Sequential.fill(&mut tensor, 0);
        assert_eq!(tensor.real_at(1, 0, 0), 1.0);
        assert_eq!(tensor.real_at(0, 1, 0), 3.0);
    }
}
