//! Tensor descriptors and owned tensor data.
//!
//! A [`TensorDesc`] records shape (`ne`, elements per axis) and strides (`nb`,
//! bytes per axis) but never owns numeric storage. Storage is either assigned
//! by the scheduler, borrowed from model parameters, or aliased through a view.

use ndarray::ArrayView2;
use thiserror::Error;

pub const MAX_DIMS: usize = 4;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("Tensor '{name}' holds {actual:?} data, {requested:?} was requested")]
    DType {
        name: String,
        requested: DType,
        actual: DType,
    },
    #[error("Tensor '{name}' buffer holds {actual} elements, its shape requires {expected}")]
    ElementCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("ndarray shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I32,
}

impl DType {
    pub const fn size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
        }
    }
}

/// Identifies a tensor inside one graph build.
///
/// The generation ties the id to the build that created it, so an id kept
/// around from an earlier decode call is rejected instead of aliasing a
/// different tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TensorId {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Placed in the scheduler arena at allocation time.
    Arena,
    /// Read-only parameter slice registered with the graph.
    Param(usize),
    /// Aliases `base` starting `offset` bytes into its storage.
    View { base: TensorId, offset: usize },
}

#[derive(Debug, Clone)]
pub struct TensorDesc {
    pub id: TensorId,
    pub name: String,
    pub dtype: DType,
    pub ne: [usize; MAX_DIMS],
    pub nb: [usize; MAX_DIMS],
    pub storage: Storage,
    pub is_input: bool,
    pub is_output: bool,
}

impl TensorDesc {
    pub(crate) fn contiguous(
        id: TensorId,
        name: impl Into<String>,
        dtype: DType,
        ne: [usize; MAX_DIMS],
        storage: Storage,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            dtype,
            ne,
            nb: contiguous_strides(dtype, ne),
            storage,
            is_input: false,
            is_output: false,
        }
    }

    pub fn n_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Bytes spanned from the first to one past the last element.
    pub fn byte_size(&self) -> usize {
        if self.n_elements() == 0 {
            return 0;
        }
        self.ne
            .iter()
            .zip(self.nb.iter())
            .map(|(&ne, &nb)| (ne - 1) * nb)
            .sum::<usize>()
            + self.dtype.size()
    }

    pub fn is_contiguous(&self) -> bool {
        self.nb == contiguous_strides(self.dtype, self.ne)
    }

    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View { .. })
    }
}

pub(crate) fn contiguous_strides(dtype: DType, ne: [usize; MAX_DIMS]) -> [usize; MAX_DIMS] {
    let mut nb = [0; MAX_DIMS];
    nb[0] = dtype.size();
    for i in 1..MAX_DIMS {
        nb[i] = nb[i - 1] * ne[i - 1];
    }
    nb
}

/// Owned copy of a tensor read back from the scheduler arena.
///
/// The raw words are only reinterpreted through [`TensorData::as_f32`] and
/// [`TensorData::as_i32`], which check the element type and count first.
#[derive(Debug, Clone)]
pub struct TensorData {
    name: String,
    dtype: DType,
    ne: [usize; MAX_DIMS],
    words: Vec<u32>,
}

impl TensorData {
    pub(crate) fn new(name: String, dtype: DType, ne: [usize; MAX_DIMS], words: Vec<u32>) -> Self {
        Self {
            name,
            dtype,
            ne,
            words,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn ne(&self) -> [usize; MAX_DIMS] {
        self.ne
    }

    pub fn n_elements(&self) -> usize {
        self.ne.iter().product()
    }

    pub fn as_f32(&self) -> Result<&[f32], TensorError> {
        Ok(bytemuck::cast_slice(self.checked(DType::F32)?))
    }

    pub fn as_i32(&self) -> Result<&[i32], TensorError> {
        Ok(bytemuck::cast_slice(self.checked(DType::I32)?))
    }

    /// Row-major `(ne[1], ne[0])` view of a 2D f32 tensor.
    pub fn as_array2(&self) -> Result<ArrayView2<'_, f32>, TensorError> {
        let values = self.as_f32()?;
        Ok(ArrayView2::from_shape((self.ne[1], self.ne[0]), values)?)
    }

    fn checked(&self, requested: DType) -> Result<&[u32], TensorError> {
        if self.dtype != requested {
            return Err(TensorError::DType {
                name: self.name.clone(),
                requested,
                actual: self.dtype,
            });
        }
        let expected = self.n_elements();
        if self.words.len() != expected {
            return Err(TensorError::ElementCount {
                name: self.name.clone(),
                expected,
                actual: self.words.len(),
            });
        }
        Ok(&self.words)
    }
}
