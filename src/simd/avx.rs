//! AVX2 lane types and the hardware 5x5 kernels built on them
//!
//! - f32: 8 lanes, one 5-tap filter row per register, 4 output columns per block
//! - f64: 4 lanes, a filter row spans two registers, 1 output column per block

use std::arch::x86_64::*;

use super::Lanes;
use crate::ops::kernel::{Conv2DKernel, KernelVariant};
use crate::ops::nn::conv5x5;
use crate::ops::nn::conv_params::ConvParams;

/// Sliding lane masks: loading 8 entries from `MASK_F32[8 - n..]` enables the low
/// `n` lanes, loading from `HIGH_MASK_F32[8 - n..]` enables lanes `>= n`.
static MASK_F32: [i32; 16] = [-1, -1, -1, -1, -1, -1, -1, -1, 0, 0, 0, 0, 0, 0, 0, 0];
static HIGH_MASK_F32: [i32; 16] = [0, 0, 0, 0, 0, 0, 0, 0, -1, -1, -1, -1, -1, -1, -1, -1];
static MASK_F64: [i64; 8] = [-1, -1, -1, -1, 0, 0, 0, 0];

// ============================================================================
// f32
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct AvxF32(__m256);

impl Lanes for AvxF32 {
    type Elem = f32;

    const WIDTH: usize = 8;
    const ALIGN: usize = 32;

    #[inline(always)]
    unsafe fn zero() -> Self {
        Self(_mm256_setzero_ps())
    }

    #[inline(always)]
    unsafe fn splat(value: f32) -> Self {
        Self(_mm256_set1_ps(value))
    }

    #[inline(always)]
    unsafe fn load(src: &[f32]) -> Self {
        debug_assert!(src.len() >= 8);
        Self(_mm256_loadu_ps(src.as_ptr()))
    }

    #[inline(always)]
    unsafe fn load_partial(src: &[f32], n: usize) -> Self {
        let n = n.min(8);
        debug_assert!(src.len() >= n);
        let mask = _mm256_loadu_si256(MASK_F32[8 - n..].as_ptr() as *const __m256i);
        Self(_mm256_maskload_ps(src.as_ptr(), mask))
    }

    #[inline(always)]
    unsafe fn store_aligned(self, dst: &mut [f32]) {
        debug_assert!(dst.len() >= 8);
        debug_assert_eq!(dst.as_ptr() as usize % 32, 0);
        _mm256_store_ps(dst.as_mut_ptr(), self.0);
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        Self(_mm256_add_ps(self.0, rhs.0))
    }

    #[inline(always)]
    unsafe fn madd(a: Self, b: Self, c: Self) -> Self {
        Self(_mm256_fmadd_ps(a.0, b.0, c.0))
    }

    #[inline(always)]
    unsafe fn hsum(self) -> f32 {
        let high = _mm256_extractf128_ps(self.0, 1);
        let low = _mm256_castps256_ps128(self.0);
        let sum128 = _mm_add_ps(low, high);
        let shuf = _mm_movehdup_ps(sum128);
        let sum64 = _mm_add_ps(sum128, shuf);
        let shuf2 = _mm_movehl_ps(sum64, sum64);
        _mm_cvtss_f32(_mm_add_ss(sum64, shuf2))
    }

    #[inline(always)]
    unsafe fn shift_up(self, n: usize) -> Self {
        if n >= 8 {
            return Self::zero();
        }
        let idx: [i32; 8] = std::array::from_fn(|i| (i as i32 - n as i32).rem_euclid(8));
        let idx = _mm256_loadu_si256(idx.as_ptr() as *const __m256i);
        let keep = _mm256_loadu_si256(HIGH_MASK_F32[8 - n..].as_ptr() as *const __m256i);
        let rotated = _mm256_permutevar8x32_ps(self.0, idx);
        Self(_mm256_and_ps(rotated, _mm256_castsi256_ps(keep)))
    }
}

// ============================================================================
// f64
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct AvxF64(__m256d);

impl Lanes for AvxF64 {
    type Elem = f64;

    const WIDTH: usize = 4;
    const ALIGN: usize = 32;

    #[inline(always)]
    unsafe fn zero() -> Self {
        Self(_mm256_setzero_pd())
    }

    #[inline(always)]
    unsafe fn splat(value: f64) -> Self {
        Self(_mm256_set1_pd(value))
    }

    #[inline(always)]
    unsafe fn load(src: &[f64]) -> Self {
        debug_assert!(src.len() >= 4);
        Self(_mm256_loadu_pd(src.as_ptr()))
    }

    #[inline(always)]
    unsafe fn load_partial(src: &[f64], n: usize) -> Self {
        let n = n.min(4);
        debug_assert!(src.len() >= n);
        let mask = _mm256_loadu_si256(MASK_F64[4 - n..].as_ptr() as *const __m256i);
        Self(_mm256_maskload_pd(src.as_ptr(), mask))
    }

    #[inline(always)]
    unsafe fn store_aligned(self, dst: &mut [f64]) {
        debug_assert!(dst.len() >= 4);
        debug_assert_eq!(dst.as_ptr() as usize % 32, 0);
        _mm256_store_pd(dst.as_mut_ptr(), self.0);
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        Self(_mm256_add_pd(self.0, rhs.0))
    }

    #[inline(always)]
    unsafe fn madd(a: Self, b: Self, c: Self) -> Self {
        Self(_mm256_fmadd_pd(a.0, b.0, c.0))
    }

    #[inline(always)]
    unsafe fn hsum(self) -> f64 {
        let high = _mm256_extractf128_pd(self.0, 1);
        let low = _mm256_castpd256_pd128(self.0);
        let sum128 = _mm_add_pd(low, high);
        let shuf = _mm_unpackhi_pd(sum128, sum128);
        _mm_cvtsd_f64(_mm_add_sd(sum128, shuf))
    }

    #[inline(always)]
    unsafe fn shift_up(self, n: usize) -> Self {
        // Only reached when a filter row fits one register, which never holds for f64
        let mut lanes = [0.0f64; 4];
        _mm256_storeu_pd(lanes.as_mut_ptr(), self.0);
        let mut out = [0.0f64; 4];
        if n < 4 {
            out[n..].copy_from_slice(&lanes[..4 - n]);
        }
        Self(_mm256_loadu_pd(out.as_ptr()))
    }
}

// ============================================================================
// Kernels
// ============================================================================

#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn conv5x5_f32(
    input: &[f32],
    weights: &[f32],
    bias: &[f32],
    output: &mut [f32],
    params: &ConvParams,
) {
    conv5x5::conv5x5::<AvxF32>(input, weights, bias, output, params)
}

#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn conv5x5_f64(
    input: &[f64],
    weights: &[f64],
    bias: &[f64],
    output: &mut [f64],
    params: &ConvParams,
) {
    conv5x5::conv5x5::<AvxF64>(input, weights, bias, output, params)
}

/// AVX2+FMA 5x5 kernel for f32. Only handed out after runtime detection.
#[derive(Debug)]
pub struct Avx5x5F32(());

/// AVX2+FMA 5x5 kernel for f64. Only handed out after runtime detection.
#[derive(Debug)]
pub struct Avx5x5F64(());

pub(crate) static AVX_5X5_F32: Avx5x5F32 = Avx5x5F32(());
pub(crate) static AVX_5X5_F64: Avx5x5F64 = Avx5x5F64(());

impl Conv2DKernel<f32> for Avx5x5F32 {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Vectorized5x5
    }

    fn name(&self) -> &'static str {
        "avx2-5x5-f32"
    }

    fn convolve_sample(
        &self,
        input: &[f32],
        weights: &[f32],
        bias: &[f32],
        output: &mut [f32],
        params: &ConvParams,
    ) {
        // SAFETY: AVX_5X5_F32 is only reachable through ConvElement::vector_kernel,
        // which checks for AVX2+FMA first.
        unsafe { conv5x5_f32(input, weights, bias, output, params) }
    }
}

impl Conv2DKernel<f64> for Avx5x5F64 {
    fn variant(&self) -> KernelVariant {
        KernelVariant::Vectorized5x5
    }

    fn name(&self) -> &'static str {
        "avx2-5x5-f64"
    }

    fn convolve_sample(
        &self,
        input: &[f64],
        weights: &[f64],
        bias: &[f64],
        output: &mut [f64],
        params: &ConvParams,
    ) {
        // SAFETY: see Avx5x5F32
        unsafe { conv5x5_f64(input, weights, bias, output, params) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::detect_simd;

    fn lanes_f32(v: AvxF32) -> [f32; 8] {
        let mut out = [0.0f32; 8];
        unsafe { _mm256_storeu_ps(out.as_mut_ptr(), v.0) };
        out
    }

    #[test]
    fn test_avx_f32_helpers() {
        if !detect_simd().has_avx2() {
            return;
        }
        let src = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        unsafe {
            let v = AvxF32::load_partial(&src, 5);
            assert_eq!(lanes_f32(v), [1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 0.0, 0.0]);
            assert_eq!(lanes_f32(v.shift_up(2)), [0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0]);
            assert_eq!(v.hsum(), 15.0);
            let r = AvxF32::madd(v, AvxF32::splat(2.0), AvxF32::splat(1.0));
            assert_eq!(r.hsum(), 38.0);
        }
    }

    #[test]
    fn test_avx_f64_helpers() {
        if !detect_simd().has_avx2() {
            return;
        }
        let src = [1.0f64, 2.0, 3.0];
        unsafe {
            let v = AvxF64::load_partial(&src, 3);
            assert_eq!(v.hsum(), 6.0);
            assert_eq!(v.shift_up(1).hsum(), 6.0);
            assert_eq!(v.shift_up(3).hsum(), 1.0);
            assert_eq!(AvxF64::madd(v, v, AvxF64::zero()).hsum(), 14.0);
        }
    }
}
