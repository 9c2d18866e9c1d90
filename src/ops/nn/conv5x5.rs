//! # Vectorized 5x5 convolution
//!
//! Computes the same result as the reference kernel for 5x5 filters, written
//! once against the [`Lanes`] interface so that it runs on AVX2 registers or on
//! the portable [`ScalarLanes`] emulation.
//!
//! ## Pre-shifted weights
//!
//! When a 5-tap filter row fits one register (8-lane f32), the row is kept in
//! `BLOCK` copies, copy `s` shifted up by `s` lanes. A single load of `WIDTH`
//! contiguous inputs multiplied by copy `s` yields the partial sum of output
//! column `x0 + s`, so one load feeds `BLOCK` adjacent columns:
//!
//! ```text
//! input  lanes:  i0 i1 i2 i3 i4 i5 i6 i7
//! copy 0:        w0 w1 w2 w3 w4 0  0  0    -> column x0
//! copy 1:        0  w0 w1 w2 w3 w4 0  0    -> column x0 + 1
//! copy 3:        0  0  0  w0 w1 w2 w3 w4   -> column x0 + 3
//! ```
//!
//! When a row is wider than a register (4-lane f64) it is split into chunks
//! and each block produces a single column.
//!
//! ## Code paths
//!
//! - 1x1 output: one wide accumulator pair per output channel, reduced once
//! - unit horizontal stride: full blocks, then a masked per-column tail
//! - other strides: masked per-column loop
//!
//! Accumulation order differs from the reference kernel, so results agree to a
//! relative tolerance, not bit-for-bit.

use std::marker::PhantomData;

use num_traits::{One, Zero};

use crate::ops::kernel::{Conv2DKernel, KernelVariant};
use crate::ops::nn::conv_params::ConvParams;
use crate::ops::tensor::ConvElement;
use crate::simd::{Lanes, ScalarLanes};

/// Filter edge length this kernel is specialized for
pub const FILTER_SIZE: usize = 5;

const MAX_CHUNKS: usize = 2;
const MAX_BLOCK: usize = 4;

/// Output columns per block and registers per filter row for a given lane width
#[inline(always)]
pub(crate) const fn block_geometry(width: usize) -> (usize, usize) {
    if FILTER_SIZE <= width {
        let block = width - FILTER_SIZE + 1;
        (if block < MAX_BLOCK { block } else { MAX_BLOCK }, 1)
    } else {
        (1, (FILTER_SIZE + width - 1) / width)
    }
}

/// One `(output, input)` filter held in registers
struct Filter<L> {
    /// `shifted[s][row][chunk]`; `shifted[0]` is the unshifted filter
    shifted: [[[L; MAX_CHUNKS]; FILTER_SIZE]; MAX_BLOCK],
}

impl<L: Lanes> Filter<L> {
    #[inline(always)]
    unsafe fn load(taps: &[L::Elem], block: usize, chunks: usize) -> Self {
        let mut shifted = [[[L::zero(); MAX_CHUNKS]; FILTER_SIZE]; MAX_BLOCK];
        for r in 0..FILTER_SIZE {
            for c in 0..chunks {
                let n = (FILTER_SIZE - c * L::WIDTH).min(L::WIDTH);
                shifted[0][r][c] = L::load_partial(&taps[r * FILTER_SIZE + c * L::WIDTH..], n);
            }
            // block > 1 implies the row fits a single register
            for s in 1..block {
                shifted[s][r][0] = shifted[0][r][0].shift_up(s);
            }
        }
        Self { shifted }
    }

    #[inline(always)]
    fn row(&self, r: usize, c: usize) -> L {
        self.shifted[0][r][c]
    }
}

/// Fill `plane` with `value`: unaligned head element-wise, aligned bulk with
/// vector stores, then the remainder element-wise.
#[inline(always)]
unsafe fn fill_plane<L: Lanes>(plane: &mut [L::Elem], value: L::Elem) {
    let head = plane.as_ptr().align_offset(L::ALIGN).min(plane.len());
    let (head_part, rest) = plane.split_at_mut(head);
    head_part.fill(value);

    let v = L::splat(value);
    let mut bulk = rest.chunks_exact_mut(2 * L::WIDTH);
    for pair in &mut bulk {
        let (a, b) = pair.split_at_mut(L::WIDTH);
        v.store_aligned(a);
        v.store_aligned(b);
    }
    bulk.into_remainder().fill(value);
}

/// Dot product of the filter with the window whose top-left tap is
/// `channel[base]`. Loads are masked to the 5 valid taps of each row.
#[inline(always)]
unsafe fn window_dot<L: Lanes>(
    filter: &Filter<L>,
    chunks: usize,
    channel: &[L::Elem],
    base: usize,
    in_width: usize,
) -> L::Elem {
    let mut sum0 = L::zero();
    let mut sum1 = L::zero();
    for r in 0..FILTER_SIZE {
        let row = base + r * in_width;
        for c in 0..chunks {
            let n = (FILTER_SIZE - c * L::WIDTH).min(L::WIDTH);
            let v = L::load_partial(&channel[row + c * L::WIDTH..], n);
            if r % 2 == 0 {
                sum0 = L::madd(filter.row(r, c), v, sum0);
            } else {
                sum1 = L::madd(filter.row(r, c), v, sum1);
            }
        }
    }
    sum0.add(sum1).hsum()
}

/// Unit horizontal stride: blocks of `block` columns share each input load
#[inline(always)]
unsafe fn accumulate_unit_stride<L: Lanes>(
    filter: &Filter<L>,
    block: usize,
    chunks: usize,
    channel: &[L::Elem],
    plane: &mut [L::Elem],
    params: &ConvParams,
) {
    let out = &params.output;
    let in_width = params.in_padded.width;
    let row_stride = params.stride_h * in_width;
    let nblocks = out.width / block;
    let span = block + FILTER_SIZE - 1;

    for (y, out_row) in plane.chunks_exact_mut(out.width).enumerate() {
        let base = y * row_stride;

        for i in 0..nblocks {
            let x0 = i * block;
            let mut dst = [L::zero(); MAX_BLOCK];
            for r in 0..FILTER_SIZE {
                let row = base + r * in_width + x0;
                for c in 0..chunks {
                    let n = (span - c * L::WIDTH).min(L::WIDTH);
                    let src = &channel[row + c * L::WIDTH..];
                    let v = if n == L::WIDTH { L::load(src) } else { L::load_partial(src, n) };
                    for s in 0..block {
                        dst[s] = L::madd(filter.shifted[s][r][c], v, dst[s]);
                    }
                }
            }
            for s in 0..block {
                out_row[x0 + s] = out_row[x0 + s] + dst[s].hsum();
            }
        }

        // columns past the last full block
        for x in nblocks * block..out.width {
            out_row[x] = out_row[x] + window_dot(filter, chunks, channel, base + x, in_width);
        }
    }
}

/// Non-unit horizontal stride: adjacent windows do not overlap contiguously
#[inline(always)]
unsafe fn accumulate_strided<L: Lanes>(
    filter: &Filter<L>,
    chunks: usize,
    channel: &[L::Elem],
    plane: &mut [L::Elem],
    params: &ConvParams,
) {
    let out = &params.output;
    let in_width = params.in_padded.width;
    let row_stride = params.stride_h * in_width;

    for (y, out_row) in plane.chunks_exact_mut(out.width).enumerate() {
        let base = y * row_stride;
        for (x, dst) in out_row.iter_mut().enumerate() {
            *dst = *dst + window_dot(filter, chunks, channel, base + x * params.stride_w, in_width);
        }
    }
}

/// Starting value of output channel `o`; the bias buffer is not read when bias is off
#[inline(always)]
fn bias_term<L: Lanes>(bias: &[L::Elem], o: usize, params: &ConvParams) -> L::Elem {
    if params.has_bias {
        bias[o]
    } else {
        L::Elem::zero()
    }
}

/// 1x1 output: each output channel is a dot product over whole windows
#[inline(always)]
unsafe fn conv_1x1<L: Lanes>(
    input: &[L::Elem],
    weights: &[L::Elem],
    bias: &[L::Elem],
    output: &mut [L::Elem],
    params: &ConvParams,
    bias_scale: L::Elem,
) {
    let in_padded = &params.in_padded;
    let taps = FILTER_SIZE * FILTER_SIZE;
    let (_, chunks) = block_geometry(L::WIDTH);

    for o in 0..params.output.depth {
        let mut acc = [L::zero(); 2];
        for inc in 0..in_padded.depth {
            if !params.table.is_connected(o, inc) {
                continue;
            }
            let w = &weights[params.filter_offset(o, inc)..][..taps];
            let channel = &input[in_padded.get_index(0, 0, inc)..][..in_padded.area()];

            if in_padded.width == FILTER_SIZE {
                // the window rows are back to back: one flat run of 25 taps
                for (k, start) in (0..taps).step_by(L::WIDTH).enumerate() {
                    let n = (taps - start).min(L::WIDTH);
                    let vw = L::load_partial(&w[start..], n);
                    let vi = L::load_partial(&channel[start..], n);
                    acc[k % 2] = L::madd(vw, vi, acc[k % 2]);
                }
            } else {
                for r in 0..FILTER_SIZE {
                    for c in 0..chunks {
                        let start = c * L::WIDTH;
                        let n = (FILTER_SIZE - start).min(L::WIDTH);
                        let vw = L::load_partial(&w[r * FILTER_SIZE + start..], n);
                        let vi = L::load_partial(&channel[r * in_padded.width + start..], n);
                        acc[r % 2] = L::madd(vw, vi, acc[r % 2]);
                    }
                }
            }
        }
        output[o] = acc[0].add(acc[1]).hsum() + bias_term::<L>(bias, o, params) * bias_scale;
    }
}

/// Convolve one batch element with a 5x5 filter bank.
///
/// # Safety
///
/// The CPU must support the instruction set `L` is built on.
///
/// # Panics
///
/// Panics if the filter is not 5x5 or `L` is narrower than 3 lanes.
#[inline(always)]
pub(crate) unsafe fn conv5x5<L: Lanes>(
    input: &[L::Elem],
    weights: &[L::Elem],
    bias: &[L::Elem],
    output: &mut [L::Elem],
    params: &ConvParams,
) {
    assert!(
        params.weight.width == FILTER_SIZE && params.weight.height == FILTER_SIZE,
        "vectorized kernel requires a 5x5 filter, got {}x{}",
        params.weight.width,
        params.weight.height
    );
    let (block, chunks) = block_geometry(L::WIDTH);
    assert!(chunks <= MAX_CHUNKS, "lane width {} is too narrow", L::WIDTH);
    debug_assert!(input.len() >= params.in_padded.size());
    debug_assert!(weights.len() >= params.weight.size());
    debug_assert!(output.len() >= params.output.size());
    debug_assert!(bias.len() >= params.bias_len());

    let out = &params.output;
    let in_padded = &params.in_padded;
    let bias_scale = if params.has_bias { L::Elem::one() } else { L::Elem::zero() };

    if out.height == 1 && out.width == 1 {
        conv_1x1::<L>(input, weights, bias, output, params, bias_scale);
        return;
    }

    for o in 0..out.depth {
        let plane = &mut output[out.get_index(0, 0, o)..][..out.area()];
        fill_plane::<L>(plane, bias_term::<L>(bias, o, params));

        for inc in 0..in_padded.depth {
            if !params.table.is_connected(o, inc) {
                continue;
            }
            let filter = Filter::<L>::load(&weights[params.filter_offset(o, inc)..], block, chunks);
            let channel = &input[in_padded.get_index(0, 0, inc)..][..in_padded.area()];

            if params.stride_w == 1 {
                accumulate_unit_stride(&filter, block, chunks, channel, plane, params);
            } else {
                accumulate_strided(&filter, chunks, channel, plane, params);
            }
        }
    }
}

/// The 5x5 kernel on a given lane type.
///
/// Only the portable [`ScalarLanes`] instantiation can be constructed directly;
/// hardware instantiations are handed out by [`ConvElement::vector_kernel`]
/// after CPU feature detection.
#[derive(Debug)]
pub struct Vectorized5x5<L>(PhantomData<L>);

impl<T: ConvElement, const N: usize> Vectorized5x5<ScalarLanes<T, N>> {
    /// Kernel running on `N`-lane emulated registers (`N >= 3`)
    pub fn emulated() -> Self {
        Self(PhantomData)
    }
}

impl<T: ConvElement, const N: usize> Conv2DKernel<T> for Vectorized5x5<ScalarLanes<T, N>> {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Vectorized5x5
    }

    fn name(&self) -> &'static str {
        "emulated-5x5"
    }

    fn convolve_sample(
        &self,
        input: &[T],
        weights: &[T],
        bias: &[T],
        output: &mut [T],
        params: &ConvParams,
    ) {
        // SAFETY: scalar lanes need no CPU extension and only touch in-bounds slices
        unsafe { conv5x5::<ScalarLanes<T, N>>(input, weights, bias, output, params) }
    }
}
