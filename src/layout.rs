use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Stride convention of a matrix operand. The test bed supports packed
/// row-major and column-major storage only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutTag {
    RowMajor,
    ColumnMajor,
}

impl LayoutTag {
    /// Classifies a rank-3 `(row, col, batch)` stride as declared by a kernel.
    ///
    /// One of the two matrix modes must be unit-stride; any other pattern is
    /// rejected.
    pub fn from_stride(operand: &'static str, stride: [usize; 3]) -> Result<Self, ConfigError> {
        match stride {
            [_, 1, _] => Ok(LayoutTag::RowMajor),
            [1, _, _] => Ok(LayoutTag::ColumnMajor),
            _ => Err(ConfigError::UnsupportedStride { operand, stride }),
        }
    }

    /// Packed layout of a `rows x cols` matrix repeated `batch` times.
    /// Returns `None` if the storage size overflows `usize`.
    pub fn packed(self, rows: usize, cols: usize, batch: usize) -> Option<TensorLayout> {
        let matrix = rows.checked_mul(cols)?;
        matrix.checked_mul(batch)?;
        let stride = match self {
            LayoutTag::RowMajor => Stride::new(cols, 1, matrix),
            LayoutTag::ColumnMajor => Stride::new(1, rows, matrix),
        };
        Some(TensorLayout::new([rows, cols, batch], stride))
    }
}

/// Rank-3 element stride: row, column and batch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Stride {
    pub row: usize,
    pub col: usize,
    pub batch: usize,
}

impl Stride {
    pub const fn new(row: usize, col: usize, batch: usize) -> Self {
        Self { row, col, batch }
    }
}

/// Maps logical `(row, col, batch)` coordinates to storage offsets.
///
/// Zero strides express broadcasting, so vectors and scalars viewed over a
/// full `(M, N, L)` extent are also `TensorLayout`s.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorLayout {
    extent: [usize; 3],
    stride: Stride,
}

impl TensorLayout {
    pub const fn new(extent: [usize; 3], stride: Stride) -> Self {
        Self { extent, stride }
    }

    /// Packed column vector of `len` elements.
    pub const fn vector(len: usize) -> Self {
        Self::new([len, 1, 1], Stride::new(1, 0, 0))
    }

    pub const fn scalar() -> Self {
        Self::vector(1)
    }

    pub fn extent(&self) -> [usize; 3] {
        self.extent
    }

    pub fn rows(&self) -> usize {
        self.extent[0]
    }

    pub fn cols(&self) -> usize {
        self.extent[1]
    }

    pub fn batch(&self) -> usize {
        self.extent[2]
    }

    pub fn stride(&self) -> Stride {
        self.stride
    }

    pub fn offset(&self, row: usize, col: usize, batch: usize) -> usize {
        row * self.stride.row + col * self.stride.col + batch * self.stride.batch
    }

    /// Number of logical elements.
    pub fn num_elements(&self) -> usize {
        self.extent.iter().product()
    }

    /// Number of storage elements spanned by the layout. The layout must
    /// already have passed [`TensorLayout::checked_storage_len`].
    pub fn storage_len(&self) -> usize {
        if self.extent.contains(&0) {
            return 0;
        }
        let [rows, cols, batch] = self.extent;
        self.offset(rows - 1, cols - 1, batch - 1) + 1
    }

    /// Number of storage elements spanned by the layout, or `None` if the
    /// highest offset does not fit in `usize`.
    pub fn checked_storage_len(&self) -> Option<usize> {
        if self.extent.contains(&0) {
            return Some(0);
        }
        let [rows, cols, batch] = self.extent;
        let span = |extent: usize, stride: usize| (extent - 1).checked_mul(stride);
        span(rows, self.stride.row)?
            .checked_add(span(cols, self.stride.col)?)?
            .checked_add(span(batch, self.stride.batch)?)?
            .checked_add(1)
    }

    /// Logical coordinates in batch, row, column order.
    pub fn coords(&self) -> impl Iterator<Item = (usize, usize, usize)> + use<> {
        let [rows, cols, batch] = self.extent;
        let batch = if self.extent.contains(&0) { 0 } else { batch };
        (0..batch).flat_map(move |l| (0..rows).flat_map(move |i| (0..cols).map(move |j| (i, j, l))))
    }
}
