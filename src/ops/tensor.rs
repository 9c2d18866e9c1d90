use std::fmt;
use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn, Slice};
use ndarray::parallel::prelude::*;
use num_traits::Float;

use crate::error::{Error, Result};
use crate::ops::kernel::Conv2DKernel;

/// Shape of a tensor
pub type Shape = Vec<usize>;

/// Data types the convolution kernels operate on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float32,
    Float64,
}

impl DataType {
    /// Get the size in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }
}

/// Scalar element type accepted by the convolution kernels.
///
/// Each implementation names the hardware 5x5 kernel for its precision when
/// the build and the running CPU support one.
pub trait ConvElement: Float + Default + fmt::Debug + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    /// Hardware-vectorized 5x5 kernel for this element type, if available
    fn vector_kernel() -> Option<&'static dyn Conv2DKernel<Self>>;
}

impl ConvElement for f32 {
    const DATA_TYPE: DataType = DataType::Float32;

    fn vector_kernel() -> Option<&'static dyn Conv2DKernel<f32>> {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            if crate::simd::detect_simd().has_avx2() {
                return Some(&crate::simd::avx::AVX_5X5_F32);
            }
        }
        None
    }
}

impl ConvElement for f64 {
    const DATA_TYPE: DataType = DataType::Float64;

    fn vector_kernel() -> Option<&'static dyn Conv2DKernel<f64>> {
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        {
            if crate::simd::detect_simd().has_avx2() {
                return Some(&crate::simd::avx::AVX_5X5_F64);
            }
        }
        None
    }
}

/// Dense row-major tensor.
///
/// The backing array is always in standard layout, so the raw element buffer is
/// one contiguous slice and `index` agrees with the slice offset.
#[derive(Clone, PartialEq)]
pub struct Tensor<T> {
    data: ArrayD<T>,
}

impl<T: ConvElement> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={:?}, dtype={:?})", self.shape(), T::DATA_TYPE)
    }
}

impl<T: ConvElement> Tensor<T> {
    /// Create a zero-filled tensor
    pub fn zeros(shape: &[usize]) -> Self {
        Self { data: ArrayD::zeros(IxDyn(shape)) }
    }

    /// Create a tensor with every element set to `value`
    pub fn filled(shape: &[usize], value: T) -> Self {
        Self { data: ArrayD::from_elem(IxDyn(shape), value) }
    }

    /// Create a tensor from a flat row-major buffer
    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "buffer of {} elements does not match shape {:?} ({} elements)",
                data.len(),
                shape,
                expected
            )));
        }
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        Ok(Self { data })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data_type(&self) -> DataType {
        T::DATA_TYPE
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the leading (batch) dimension
    pub fn batch_size(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Number of elements in one batch element
    pub fn batch_stride(&self) -> usize {
        self.shape().iter().skip(1).product()
    }

    /// Flat row-major offset of `coords`
    pub fn index(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.shape().len());
        coords
            .iter()
            .zip(self.data.strides())
            .map(|(&c, &s)| c * s as usize)
            .sum()
    }

    /// Element at `coords`
    pub fn at(&self, coords: &[usize]) -> T {
        self.data[IxDyn(coords)]
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice().unwrap_or_default()
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        self.data.as_slice_mut().unwrap_or_default()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data.into_raw_vec()
    }

    /// View of the batch elements in `range`, sharing this tensor's storage
    pub fn sub_view(&self, range: Range<usize>) -> Result<TensorView<'_, T>> {
        self.check_batch_range(&range)?;
        Ok(TensorView {
            data: self.data.slice_axis(Axis(0), Slice::from(range)),
        })
    }

    /// Mutable view of the batch elements in `range`
    pub fn sub_view_mut(&mut self, range: Range<usize>) -> Result<TensorViewMut<'_, T>> {
        self.check_batch_range(&range)?;
        Ok(TensorViewMut {
            data: self.data.slice_axis_mut(Axis(0), Slice::from(range)),
        })
    }

    /// One view per batch element, in order
    pub fn batches(&self) -> impl ExactSizeIterator<Item = TensorView<'_, T>> {
        self.data.axis_iter(Axis(0)).map(|data| TensorView { data })
    }

    /// One mutable view per batch element, in order
    pub fn batches_mut(&mut self) -> impl ExactSizeIterator<Item = TensorViewMut<'_, T>> {
        self.data.axis_iter_mut(Axis(0)).map(|data| TensorViewMut { data })
    }

    /// Parallel iterator over batch elements
    pub fn par_batches(&self) -> impl IndexedParallelIterator<Item = TensorView<'_, T>> {
        self.data.axis_iter(Axis(0)).into_par_iter().map(|data| TensorView { data })
    }

    /// Parallel iterator over disjoint mutable batch elements
    pub fn par_batches_mut(&mut self) -> impl IndexedParallelIterator<Item = TensorViewMut<'_, T>> {
        self.data.axis_iter_mut(Axis(0)).into_par_iter().map(|data| TensorViewMut { data })
    }

    fn check_batch_range(&self, range: &Range<usize>) -> Result<()> {
        if self.shape().is_empty() || range.start > range.end || range.end > self.batch_size() {
            return Err(Error::ShapeMismatch(format!(
                "batch range {:?} out of bounds for tensor of shape {:?}",
                range,
                self.shape()
            )));
        }
        Ok(())
    }
}

/// Read-only view into a contiguous range of a tensor's storage
#[derive(Debug, Clone)]
pub struct TensorView<'a, T> {
    data: ArrayViewD<'a, T>,
}

impl<'a, T: ConvElement> TensorView<'a, T> {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.data.to_slice().unwrap_or_default()
    }
}

/// Mutable view into a contiguous range of a tensor's storage
#[derive(Debug)]
pub struct TensorViewMut<'a, T> {
    data: ArrayViewMutD<'a, T>,
}

impl<'a, T: ConvElement> TensorViewMut<'a, T> {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice().unwrap_or_default()
    }

    pub fn as_slice_mut(&mut self) -> &mut [T] {
        self.data.as_slice_mut().unwrap_or_default()
    }
}
