//! Portable emulation of a `N`-lane register.
//!
//! Runs the vectorized kernel's structural logic on any target, which keeps the
//! fast path testable without AVX hardware.

use super::Lanes;
use crate::ops::tensor::ConvElement;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalarLanes<T, const N: usize>(pub [T; N]);

pub type ScalarF32x8 = ScalarLanes<f32, 8>;
pub type ScalarF64x4 = ScalarLanes<f64, 4>;

impl<T: ConvElement, const N: usize> Lanes for ScalarLanes<T, N> {
    type Elem = T;

    const WIDTH: usize = N;
    const ALIGN: usize = std::mem::align_of::<T>();

    #[inline(always)]
    unsafe fn zero() -> Self {
        Self([T::zero(); N])
    }

    #[inline(always)]
    unsafe fn splat(value: T) -> Self {
        Self([value; N])
    }

    #[inline(always)]
    unsafe fn load(src: &[T]) -> Self {
        let mut lanes = [T::zero(); N];
        lanes.copy_from_slice(&src[..N]);
        Self(lanes)
    }

    #[inline(always)]
    unsafe fn load_partial(src: &[T], n: usize) -> Self {
        let n = n.min(N);
        let mut lanes = [T::zero(); N];
        lanes[..n].copy_from_slice(&src[..n]);
        Self(lanes)
    }

    #[inline(always)]
    unsafe fn store_aligned(self, dst: &mut [T]) {
        dst[..N].copy_from_slice(&self.0);
    }

    #[inline(always)]
    unsafe fn add(self, rhs: Self) -> Self {
        let mut out = self.0;
        out.iter_mut().zip(rhs.0).for_each(|(a, b)| *a = *a + b);
        Self(out)
    }

    #[inline(always)]
    unsafe fn madd(a: Self, b: Self, c: Self) -> Self {
        let mut out = c.0;
        for i in 0..N {
            out[i] = a.0[i] * b.0[i] + out[i];
        }
        Self(out)
    }

    #[inline(always)]
    unsafe fn hsum(self) -> T {
        // pairwise, like the hardware reductions
        let mut lanes = self.0;
        let mut width = N;
        while width > 1 {
            let half = width / 2;
            for i in 0..half {
                lanes[i] = lanes[i] + lanes[i + half];
            }
            if width % 2 == 1 {
                lanes[0] = lanes[0] + lanes[width - 1];
            }
            width = half;
        }
        lanes[0]
    }

    #[inline(always)]
    unsafe fn shift_up(self, n: usize) -> Self {
        let mut out = [T::zero(); N];
        if n < N {
            out[n..].copy_from_slice(&self.0[..N - n]);
        }
        Self(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_zero_fills() {
        let src = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let v = unsafe { ScalarF32x8::load_partial(&src, 5) };
        assert_eq!(v.0, [1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_shift_up() {
        let v = ScalarF32x8::from_fn(|i| i as f32 + 1.0);
        let shifted = unsafe { v.shift_up(3) };
        assert_eq!(shifted.0, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(unsafe { v.shift_up(8) }.0, [0.0; 8]);
    }

    #[test]
    fn test_hsum_and_madd() {
        let a: ScalarF64x4 = ScalarLanes([1.0, 2.0, 3.0, 4.0]);
        let b = unsafe { ScalarF64x4::splat(2.0) };
        let c = unsafe { ScalarF64x4::splat(0.5) };
        let r = unsafe { ScalarF64x4::madd(a, b, c) };
        assert_eq!(r.0, [2.5, 4.5, 6.5, 8.5]);
        assert_eq!(unsafe { r.hsum() }, 22.0);

        let odd = ScalarLanes::<f32, 5>([1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(unsafe { odd.hsum() }, 15.0);
    }

    impl ScalarF32x8 {
        fn from_fn(f: impl Fn(usize) -> f32) -> Self {
            Self(std::array::from_fn(f))
        }
    }
}
