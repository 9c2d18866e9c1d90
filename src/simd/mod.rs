//! Lane arithmetic used by the vectorized 5x5 kernel
//!
//! The kernel's structure (bias fill, block/tail split, stride branching, the
//! 1x1 special case) is written once against the [`Lanes`] trait. Each lane type
//! provides the handful of wide operations the kernel needs.
//!
//! | Lane type            | Instruction set | Width (f32 / f64) |
//! |----------------------|-----------------|-------------------|
//! | `AvxF32` / `AvxF64`  | AVX2 + FMA      | 8 / 4             |
//! | `ScalarLanes<T, N>`  | none            | N                 |

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
pub mod avx;
pub mod scalar;

use std::sync::OnceLock;

use crate::ops::tensor::ConvElement;

pub use scalar::ScalarLanes;

/// SIMD capability level detected at runtime
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdLevel {
    /// AVX2 with FMA support (256-bit vectors, 8 f32s or 4 f64s)
    Avx2Fma = 1,
    /// No usable vector extension
    Scalar = 0,
}

impl SimdLevel {
    /// Returns true if this level supports 256-bit operations
    #[inline]
    pub const fn has_avx2(self) -> bool {
        matches!(self, Self::Avx2Fma)
    }

    /// Returns the number of f32 elements per vector register
    #[inline]
    pub const fn f32_lanes(self) -> usize {
        match self {
            Self::Avx2Fma => 8,
            Self::Scalar => 1,
        }
    }

    /// Returns the number of f64 elements per vector register
    #[inline]
    pub const fn f64_lanes(self) -> usize {
        match self {
            Self::Avx2Fma => 4,
            Self::Scalar => 1,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avx2Fma => "AVX2+FMA",
            Self::Scalar => "Scalar",
        }
    }
}

impl std::fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Detect the best available SIMD level for the current CPU (cached)
#[inline]
pub fn detect_simd() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(|| {
        let level = detect_simd_uncached();
        log::debug!("detected SIMD level: {}", level);
        level
    })
}

#[cold]
fn detect_simd_uncached() -> SimdLevel {
    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return SimdLevel::Avx2Fma;
        }
    }

    SimdLevel::Scalar
}

/// A fixed-width register of `WIDTH` elements.
///
/// # Safety
///
/// Every method is `unsafe`: hardware implementations require the CPU to
/// support their instruction set, and slice arguments must hold at least the
/// number of elements the method reads or writes.
pub trait Lanes: Copy {
    type Elem: ConvElement;

    /// Elements per register
    const WIDTH: usize;
    /// Byte alignment required by `store_aligned`
    const ALIGN: usize;

    unsafe fn zero() -> Self;

    unsafe fn splat(value: Self::Elem) -> Self;

    /// Load `WIDTH` elements from the front of `src`
    unsafe fn load(src: &[Self::Elem]) -> Self;

    /// Load the first `n` elements of `src`, zero-filling the remaining lanes.
    /// Never touches memory past `src[n - 1]`.
    unsafe fn load_partial(src: &[Self::Elem], n: usize) -> Self;

    /// Store all lanes to the front of `dst`, which must be `ALIGN`-aligned
    unsafe fn store_aligned(self, dst: &mut [Self::Elem]);

    unsafe fn add(self, rhs: Self) -> Self;

    /// `a * b + c`
    unsafe fn madd(a: Self, b: Self, c: Self) -> Self;

    /// Sum of all lanes
    unsafe fn hsum(self) -> Self::Elem;

    /// Move every lane `n` positions toward the high end; the low `n` lanes become zero
    unsafe fn shift_up(self, n: usize) -> Self;
}
