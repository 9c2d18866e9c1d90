//! # 2D Convolution Forward Pass
//!
//! This module holds the shape-agnostic reference kernel and the dispatch layer
//! that routes a call either to it or to the vectorized 5x5 kernel.
//!
//! ## Data layout
//!
//! - input: `[batch][in_channel][y][x]`, already padded to `params.in_padded`
//! - weights: `[out_channel][in_channel][filter_row][filter_col]`
//! - bias: `[out_channel]` (may be empty when `params.has_bias` is false)
//! - output: `[batch][out_channel][y][x]`, sized to `params.output`
//!
//! ## Kernel selection
//!
//! [`select_kernel`] picks the vectorized kernel when the filter is 5x5 and a
//! hardware implementation exists for the element type; otherwise the
//! reference kernel runs. The fallback is silent and deterministic.
//!
//! ## Parallelism
//!
//! Batch elements are independent: each reads shared input/weights/bias and
//! writes a disjoint output slice. With `parallelize` set they are fanned out
//! over the current rayon pool.
//!
//! ## Usage Example:
//! ```rust
//! use conv_kernel::{conv2d, ConvParams, Tensor};
//!
//! let params = ConvParams::builder().input(9, 9, 1).window(5, 5).out_channels(1).build()?;
//! let input = Tensor::<f32>::filled(&[1, 1, 9, 9], 1.0);
//! let weights = Tensor::<f32>::filled(&[1, 1, 5, 5], 1.0);
//! let bias = Tensor::<f32>::filled(&[1], 1.0);
//! let mut output = Tensor::<f32>::zeros(&[1, 1, 5, 5]);
//!
//! conv2d(&input, &weights, &bias, &mut output, &params, false)?;
//! assert!(output.as_slice().iter().all(|&v| v == 26.0));
//! # Ok::<(), conv_kernel::Error>(())
//! ```

use log::{debug, trace};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::ops::kernel::{Conv2DKernel, KernelVariant};
use crate::ops::nn::conv5x5::FILTER_SIZE;
use crate::ops::nn::conv_params::ConvParams;
use crate::ops::tensor::{ConvElement, Tensor};

/// Direct nested-loop convolution.
///
/// Works for any filter size, stride, and connectivity and serves as the
/// correctness baseline for the vectorized kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceKernel;

impl<T: ConvElement> Conv2DKernel<T> for ReferenceKernel {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Reference
    }

    fn name(&self) -> &'static str {
        "reference"
    }

    fn convolve_sample(
        &self,
        input: &[T],
        weights: &[T],
        bias: &[T],
        output: &mut [T],
        params: &ConvParams,
    ) {
        let out = &params.output;
        let in_padded = &params.in_padded;
        let window = &params.weight;
        debug_assert!(input.len() >= in_padded.size());
        debug_assert!(output.len() >= out.size());

        for o in 0..out.depth {
            let b = if params.has_bias { bias[o] } else { T::zero() };

            for y in 0..out.height {
                for x in 0..out.width {
                    let mut sum = b;
                    let y0 = y * params.stride_h;
                    let x0 = x * params.stride_w;

                    for inc in 0..in_padded.depth {
                        if !params.table.is_connected(o, inc) {
                            continue;
                        }
                        let w = &weights[params.filter_offset(o, inc)..];
                        for ky in 0..window.height {
                            let w_row = &w[ky * window.width..][..window.width];
                            let start = in_padded.get_index(y0 + ky, x0, inc);
                            let in_row = &input[start..][..window.width];
                            for (&wv, &iv) in w_row.iter().zip(in_row) {
                                sum = sum + wv * iv;
                            }
                        }
                    }

                    output[out.get_index(y, x, o)] = sum;
                }
            }
        }
    }
}

/// Choose the kernel variant for `params`.
///
/// Pure function of the filter shape and whether a vectorized implementation
/// is available for the element type in this build and on this CPU.
pub fn select_kernel(params: &ConvParams, simd_available: bool) -> KernelVariant {
    if simd_available && params.weight.width == FILTER_SIZE && params.weight.height == FILTER_SIZE {
        KernelVariant::Vectorized5x5
    } else {
        KernelVariant::Reference
    }
}

/// Resolve the kernel [`select_kernel`] picks for element type `T`
pub fn kernel_for<T: ConvElement>(params: &ConvParams) -> &'static dyn Conv2DKernel<T> {
    static REFERENCE: ReferenceKernel = ReferenceKernel;

    let vector = T::vector_kernel();
    match (select_kernel(params, vector.is_some()), vector) {
        (KernelVariant::Vectorized5x5, Some(kernel)) => kernel,
        _ => &REFERENCE,
    }
}

/// Forward 2D convolution over a whole batch.
///
/// Overwrites every element of `output`. Buffer sizes are checked against
/// `params` before anything is written.
pub fn conv2d<T: ConvElement>(
    input: &Tensor<T>,
    weights: &Tensor<T>,
    bias: &Tensor<T>,
    output: &mut Tensor<T>,
    params: &ConvParams,
    parallelize: bool,
) -> Result<()> {
    let kernel = kernel_for::<T>(params);
    debug!(
        "conv2d: {} kernel ({}) for {}x{} filter, {:?} -> {:?}",
        kernel.variant(),
        kernel.name(),
        params.weight.width,
        params.weight.height,
        params.in_padded,
        params.output
    );
    run_kernel(kernel, input, weights, bias, output, params, parallelize)
}

/// Run `kernel` once per batch element, optionally in parallel.
pub fn run_kernel<T: ConvElement>(
    kernel: &dyn Conv2DKernel<T>,
    input: &Tensor<T>,
    weights: &Tensor<T>,
    bias: &Tensor<T>,
    output: &mut Tensor<T>,
    params: &ConvParams,
    parallelize: bool,
) -> Result<()> {
    validate_buffers(input, weights, bias, output, params)?;

    let weights = weights.as_slice();
    let bias = bias.as_slice();
    let batch = input.batch_size();

    if parallelize && batch > 1 {
        trace!("conv2d: fanning out {} batch elements", batch);
        input
            .par_batches()
            .zip(output.par_batches_mut())
            .for_each(|(inp, mut out)| {
                kernel.convolve_sample(inp.as_slice(), weights, bias, out.as_slice_mut(), params)
            });
    } else {
        trace!("conv2d: running {} batch elements sequentially", batch);
        for (inp, mut out) in input.batches().zip(output.batches_mut()) {
            kernel.convolve_sample(inp.as_slice(), weights, bias, out.as_slice_mut(), params);
        }
    }
    Ok(())
}

fn validate_buffers<T: ConvElement>(
    input: &Tensor<T>,
    weights: &Tensor<T>,
    bias: &Tensor<T>,
    output: &Tensor<T>,
    params: &ConvParams,
) -> Result<()> {
    if input.shape().is_empty() || input.batch_stride() != params.in_padded.size() {
        return Err(Error::ShapeMismatch(format!(
            "input shape {:?} does not hold batches of padded input {:?}",
            input.shape(),
            params.in_padded
        )));
    }
    if output.shape().is_empty()
        || output.batch_size() != input.batch_size()
        || output.batch_stride() != params.output.size()
    {
        return Err(Error::ShapeMismatch(format!(
            "output shape {:?} does not hold {} batches of {:?}",
            output.shape(),
            input.batch_size(),
            params.output
        )));
    }
    if weights.len() != params.weight_len() {
        return Err(Error::ShapeMismatch(format!(
            "weights hold {} elements, expected {}",
            weights.len(),
            params.weight_len()
        )));
    }
    if bias.len() < params.bias_len() {
        return Err(Error::ShapeMismatch(format!(
            "bias holds {} elements, expected {}",
            bias.len(),
            params.bias_len()
        )));
    }
    Ok(())
}

/// Copy an unpadded batch into a zero-filled tensor sized per `params.in_padded`.
///
/// The input sits centred: `(padded - unpadded) / 2` zeros before it on each axis.
pub fn pad_input<T: ConvElement>(input: &Tensor<T>, params: &ConvParams) -> Result<Tensor<T>> {
    let src_shape = params.input;
    let dst_shape = params.in_padded;
    if input.shape().is_empty() || input.batch_stride() != src_shape.size() {
        return Err(Error::ShapeMismatch(format!(
            "input shape {:?} does not hold batches of {:?}",
            input.shape(),
            src_shape
        )));
    }

    let batch = input.batch_size();
    let mut padded = Tensor::zeros(&[batch, dst_shape.depth, dst_shape.height, dst_shape.width]);
    let pad_y = (dst_shape.height - src_shape.height) / 2;
    let pad_x = (dst_shape.width - src_shape.width) / 2;

    for (src, mut dst) in input.batches().zip(padded.batches_mut()) {
        let src = src.as_slice();
        let dst = dst.as_slice_mut();
        for c in 0..src_shape.depth {
            for y in 0..src_shape.height {
                let s = src_shape.get_index(y, 0, c);
                let d = dst_shape.get_index(y + pad_y, pad_x, c);
                dst[d..d + src_shape.width].copy_from_slice(&src[s..s + src_shape.width]);
            }
        }
    }
    Ok(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::nn::connection_table::ConnectionTable;
    use crate::ops::nn::conv_params::Padding;

    /// 2D convolution with a hand-computed result
    #[test]
    fn test_reference_small() {
        let params = ConvParams::builder()
            .input(3, 3, 1)
            .window(2, 2)
            .out_channels(1)
            .bias(false)
            .build()
            .unwrap();
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut output = [0.0f64; 4];

        ReferenceKernel.convolve_sample(&input, &weights, &[], &mut output, &params);
        // [1*1 + 2*2 + 4*3 + 5*4, 2*1 + 3*2 + 5*3 + 6*4, ...]
        assert_eq!(output, [37.0, 47.0, 67.0, 77.0]);
    }

    #[test]
    fn test_reference_stride_and_table() {
        // two input channels, one output channel reading only channel 1
        let params = ConvParams::builder()
            .input(4, 4, 2)
            .window(2, 2)
            .out_channels(1)
            .stride(2, 2)
            .table(ConnectionTable::from_bools(1, 2, &[false, true]).unwrap())
            .build()
            .unwrap();
        let input: Vec<f32> = (0..32).map(|v| v as f32).collect();
        let weights = [1.0f32; 8];
        let mut output = [0.0f32; 4];

        ReferenceKernel.convolve_sample(&input, &weights, &[0.5], &mut output, &params);
        // channel 1 starts at 16; windows at (0,0), (0,2), (2,0), (2,2)
        let expected = [
            16.0 + 17.0 + 20.0 + 21.0 + 0.5,
            18.0 + 19.0 + 22.0 + 23.0 + 0.5,
            24.0 + 25.0 + 28.0 + 29.0 + 0.5,
            26.0 + 27.0 + 30.0 + 31.0 + 0.5,
        ];
        assert_eq!(output, expected);
    }

    #[test]
    fn test_select_kernel() {
        let five = ConvParams::builder().input(9, 9, 1).window(5, 5).build().unwrap();
        let three = ConvParams::builder().input(9, 9, 1).window(3, 3).build().unwrap();
        let wide = ConvParams::builder().input(9, 9, 1).window(5, 3).build().unwrap();

        assert_eq!(select_kernel(&five, true), KernelVariant::Vectorized5x5);
        assert_eq!(select_kernel(&five, false), KernelVariant::Reference);
        assert_eq!(select_kernel(&three, true), KernelVariant::Reference);
        assert_eq!(select_kernel(&wide, true), KernelVariant::Reference);
    }

    #[test]
    fn test_kernel_for_falls_back() {
        let three = ConvParams::builder().input(9, 9, 1).window(3, 3).build().unwrap();
        assert_eq!(kernel_for::<f32>(&three).variant(), KernelVariant::Reference);

        let five = ConvParams::builder().input(9, 9, 1).window(5, 5).build().unwrap();
        let expected = if f64::vector_kernel().is_some() {
            KernelVariant::Vectorized5x5
        } else {
            KernelVariant::Reference
        };
        assert_eq!(kernel_for::<f64>(&five).variant(), expected);
    }

    #[test]
    fn test_conv2d_scenario() {
        let params = ConvParams::builder().input(9, 9, 1).window(5, 5).build().unwrap();
        let input = Tensor::<f32>::filled(&[2, 1, 9, 9], 1.0);
        let weights = Tensor::<f32>::filled(&[1, 1, 5, 5], 1.0);
        let bias = Tensor::<f32>::filled(&[1], 1.0);
        let mut output = Tensor::<f32>::filled(&[2, 1, 5, 5], -7.0);

        conv2d(&input, &weights, &bias, &mut output, &params, true).unwrap();
        assert!(output.as_slice().iter().all(|&v| v == 26.0));
    }

    #[test]
    fn test_conv2d_rejects_mismatched_buffers() {
        let params = ConvParams::builder()
            .input(9, 9, 1)
            .window(5, 5)
            .out_channels(2)
            .build()
            .unwrap();
        let input = Tensor::<f32>::zeros(&[1, 1, 9, 9]);
        let weights = Tensor::<f32>::zeros(&[2, 1, 5, 5]);
        let bias = Tensor::<f32>::zeros(&[2]);

        let mut small_output = Tensor::<f32>::filled(&[1, 1, 5, 5], 3.0);
        let err = conv2d(&input, &weights, &bias, &mut small_output, &params, false).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
        assert!(small_output.as_slice().iter().all(|&v| v == 3.0));

        let mut output = Tensor::<f32>::zeros(&[1, 2, 5, 5]);
        let short_bias = Tensor::<f32>::zeros(&[1]);
        assert!(conv2d(&input, &weights, &short_bias, &mut output, &params, false).is_err());

        let wrong_input = Tensor::<f32>::zeros(&[1, 1, 8, 9]);
        assert!(conv2d(&wrong_input, &weights, &bias, &mut output, &params, false).is_err());
    }

    #[test]
    fn test_pad_input() {
        let params = ConvParams::builder()
            .input(2, 2, 1)
            .window(3, 3)
            .padding(Padding::Same)
            .build()
            .unwrap();
        let input = Tensor::<f64>::from_vec(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let padded = pad_input(&input, &params).unwrap();

        assert_eq!(padded.shape(), &[1, 1, 4, 4]);
        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 2.0, 0.0,
            0.0, 3.0, 4.0, 0.0,
            0.0, 0.0, 0.0, 0.0,
        ];
        assert_eq!(padded.as_slice(), &expected);
    }
}
