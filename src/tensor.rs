use crate::{
    Error,
    data_type::{DataType, Element, F8E4M3, F8E5M2},
    layout::{LayoutTag, TensorLayout},
};
use half::{bf16, f16};
use num_complex::{Complex32, Complex64};
use std::fmt;

mod mirrored;

pub use mirrored::MirroredTensor;

/// Type-erased element storage.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    Bf16(Vec<bf16>),
    F8E4M3(Vec<F8E4M3>),
    F8E5M2(Vec<F8E5M2>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    C32(Vec<Complex32>),
}

macro_rules! dispatch {
    ($data:expr, $vec:ident => $body:expr) => {
        match $data {
            TensorData::F32($vec) => $body,
            TensorData::F16($vec) => $body,
            TensorData::Bf16($vec) => $body,
            TensorData::F8E4M3($vec) => $body,
            TensorData::F8E5M2($vec) => $body,
            TensorData::I8($vec) => $body,
            TensorData::I32($vec) => $body,
            TensorData::C32($vec) => $body,
        }
    };
}

impl TensorData {
    /// Zero-initialized storage of `len` elements.
    pub fn zeros(data_type: DataType, len: usize) -> Self {
        fn zeroed<T: Element>(len: usize) -> Vec<T> {
            vec![T::zeroed(); len]
        }

        match data_type {
            DataType::F32 => TensorData::F32(zeroed(len)),
            DataType::F16 => TensorData::F16(zeroed(len)),
            DataType::Bf16 => TensorData::Bf16(zeroed(len)),
            DataType::F8E4M3 => TensorData::F8E4M3(zeroed(len)),
            DataType::F8E5M2 => TensorData::F8E5M2(zeroed(len)),
            DataType::I8 => TensorData::I8(zeroed(len)),
            DataType::I32 => TensorData::I32(zeroed(len)),
            DataType::C32 => TensorData::C32(zeroed(len)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TensorData::F32(_) => DataType::F32,
            TensorData::F16(_) => DataType::F16,
            TensorData::Bf16(_) => DataType::Bf16,
            TensorData::F8E4M3(_) => DataType::F8E4M3,
            TensorData::F8E5M2(_) => DataType::F8E5M2,
            TensorData::I8(_) => DataType::I8,
            TensorData::I32(_) => DataType::I32,
            TensorData::C32(_) => DataType::C32,
        }
    }

    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at storage index `index`, widened to the compute type.
    pub fn get(&self, index: usize) -> Complex64 {
        dispatch!(self, v => v[index].to_compute())
    }

    /// Stores `value` at storage index `index`, rounding to the element type.
    pub fn set(&mut self, index: usize, value: Complex64) {
        dispatch!(self, v => v[index] = Element::from_compute(value))
    }

    pub fn as_bytes(&self) -> &[u8] {
        dispatch!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        dispatch!(self, v => bytemuck::cast_slice_mut(v.as_mut_slice()))
    }

    /// Whether the elements at the two storage indices have identical
    /// encodings.
    pub fn bits_equal(&self, index: usize, other: &TensorData, other_index: usize) -> bool {
        if self.data_type() != other.data_type() {
            return false;
        }
        let size = self.data_type().size();
        self.as_bytes()[index * size..(index + 1) * size]
            == other.as_bytes()[other_index * size..(other_index + 1) * size]
    }
}

/// Named host-resident tensor with an explicit layout.
#[derive(Clone, Debug, PartialEq)]
pub struct HostTensor {
    name: &'static str,
    data: TensorData,
    layout: TensorLayout,
}

impl HostTensor {
    /// Allocates zeroed storage covering every element `layout` can address.
    pub fn zeros(name: &'static str, data_type: DataType, layout: TensorLayout) -> Self {
        Self {
            name,
            data: TensorData::zeros(data_type, layout.storage_len()),
            layout,
        }
    }

    /// Zeroed packed `rows x cols x batch` tensor.
    ///
    /// Fails with [`Error::Shape`] if the byte size does not fit in `usize`.
    pub fn packed(
        name: &'static str,
        data_type: DataType,
        tag: LayoutTag,
        extent: [usize; 3],
    ) -> Result<Self, Error> {
        let [rows, cols, batch] = extent;
        let layout = tag
            .packed(rows, cols, batch)
            .filter(|layout| {
                layout
                    .checked_storage_len()
                    .and_then(|len| len.checked_mul(data_type.size()))
                    .is_some()
            })
            .ok_or(Error::Shape { name, extent })?;
        Ok(Self::zeros(name, data_type, layout))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn num_elements(&self) -> usize {
        self.layout.num_elements()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.as_bytes().len()
    }

    pub fn at(&self, row: usize, col: usize, batch: usize) -> Complex64 {
        self.data.get(self.layout.offset(row, col, batch))
    }

    /// Real part of the element at the given coordinate.
    pub fn real_at(&self, row: usize, col: usize, batch: usize) -> f64 {
        self.at(row, col, batch).re
    }

    pub fn set(&mut self, row: usize, col: usize, batch: usize, value: Complex64) {
        let offset = self.layout.offset(row, col, batch);
        self.data.set(offset, value);
    }

    pub fn set_real(&mut self, row: usize, col: usize, batch: usize, value: f64) {
        self.set(row, col, batch, Complex64::new(value, 0.0));
    }

    /// Writes `value` to every storage element.
    pub fn fill(&mut self, value: f64) {
        let value = Complex64::new(value, 0.0);
        for index in 0..self.data.len() {
            self.data.set(index, value);
        }
    }

    /// Copies logical elements from `other`, converting element types.
    ///
    /// # Panics
    /// Panics if the logical extents differ.
    pub fn copy_from(&mut self, other: &HostTensor) {
        assert_eq!(
            self.layout.extent(),
            other.layout.extent(),
            "cannot copy `{}` into `{}`: extents differ",
            other.name,
            self.name,
        );
        for (i, j, l) in self.layout.coords() {
            let value = other.at(i, j, l);
            self.set(i, j, l, value);
        }
    }

    /// Frobenius norm over the logical elements.
    pub fn norm(&self) -> f64 {
        self.layout
            .coords()
            .map(|(i, j, l)| self.at(i, j, l).norm_sqr())
            .sum::<f64>()
            .sqrt()
    }
}

/// Prints each batch as rows of comma-separated values.
impl fmt::Display for HostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [rows, cols, batch] = self.layout.extent();
        for l in 0..batch {
            if batch > 1 {
                writeln!(f, "[batch {l}]")?;
            }
            for i in 0..rows {
                for j in 0..cols {
                    if j > 0 {
                        f.write_str(", ")?;
                    }
                    let value = self.at(i, j, l);
                    if self.data_type().is_complex() {
                        write!(f, "({}, {})", value.re, value.im)?;
                    } else {
                        write!(f, "{}", value.re)?;
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutTag;

    #[test]
    fn zeros_and_set() {
        let layout = LayoutTag::ColumnMajor.packed(2, 3, 1).unwrap();
        let mut tensor = HostTensor::zeros("C", DataType::F16, layout);
        assert_eq!(tensor.size_in_bytes(), 12);
        tensor.set_real(1, 2, 0, 2.5);
        assert_eq!(tensor.real_at(1, 2, 0), 2.5);
        assert_eq!(tensor.data().get(5).re, 2.5);
        assert_eq!(tensor.norm(), 2.5);
    }

    #[test]
    fn copy_converts_between_layouts_and_types() {
        let mut source = HostTensor::zeros(
            "C",
            DataType::F32,
            LayoutTag::RowMajor.packed(2, 2, 2).unwrap(),
        );
        for (index, (i, j, l)) in source.layout().coords().enumerate() {
            source.set_real(i, j, l, index as f64);
        }

        let mut target = HostTensor::zeros(
            "D",
            DataType::I32,
            LayoutTag::ColumnMajor.packed(2, 2, 2).unwrap(),
        );
        target.copy_from(&source);

        for (i, j, l) in source.layout().coords() {
            assert_eq!(target.at(i, j, l), source.at(i, j, l));
        }
    }

    #[test]
    fn bits_equal_distinguishes_signed_zero() {
        let mut data = TensorData::zeros(DataType::F32, 2);
        data.set(1, Complex64::new(-0.0, 0.0));
        assert!(!data.bits_equal(0, &data, 1));
        assert!(data.bits_equal(0, &data, 0));
    }

    #[test]
    fn packed_rejects_overflow() {
        let result = HostTensor::packed("A", DataType::F32, LayoutTag::RowMajor, [usize::MAX / 2, 1, 1]);
        assert!(matches!(result, Err(Error::Shape { name: "A", .. })));

        let tensor = HostTensor::packed("A", DataType::F32, LayoutTag::ColumnMajor, [4, 2, 3]).unwrap();
        assert_eq!(tensor.size_in_bytes(), 96);
    }

    #[test]
    fn display_rows() {
        let mut tensor = HostTensor::zeros("v", DataType::F32, TensorLayout::vector(2));
        tensor.fill(1.5);
        assert_eq!(tensor.to_string(), "1.5\n1.5\n");
    }
}
