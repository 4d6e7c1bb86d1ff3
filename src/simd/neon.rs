//! NEON four-lane register (`float32x4_t`).
//!
//! | Operation          | Instruction       |
//! |--------------------|-------------------|
//! | aligned load/store | `ld1` / `st1`     |
//! | add / multiply     | `fadd` / `fmul`   |
//! | lane rotation      | `ext`             |
//! | rsqrt estimate     | `frsqrte`         |
//!
//! `frsqrte` is an 8-bit table lookup. Its error bound is taken as 2⁻⁷.

use std::arch::aarch64::*;
use std::fmt;
use std::ops::{Add, Mul};

use crate::simd::traits::SimdVec;
use crate::simd::{LANE_ALIGNMENT, LANE_COUNT};

/// A SIMD vector of 4 32-bit floating point values
#[derive(Copy, Clone)]
pub struct F32x4 {
    elements: float32x4_t,
}

impl F32x4 {
    #[inline(always)]
    pub fn new(elements: [f32; LANE_COUNT]) -> Self {
        F32x4 {
            elements: unsafe { vld1q_f32(elements.as_ptr()) },
        }
    }

    #[inline(always)]
    pub fn to_array(self) -> [f32; LANE_COUNT] {
        let mut out = [0.0f32; LANE_COUNT];
        unsafe { vst1q_f32(out.as_mut_ptr(), self.elements) };
        out
    }
}

impl SimdVec<f32> for F32x4 {
    const LANE_COUNT: usize = LANE_COUNT;
    const ALIGNMENT: usize = LANE_ALIGNMENT;
    const BACKEND: &'static str = "neon";
    const RSQRT_ESTIMATE_MAX_REL_ERROR: f32 = 1.0 / 128.0;

    #[inline(always)]
    fn splat(value: f32) -> Self {
        F32x4 {
            elements: unsafe { vdupq_n_f32(value) },
        }
    }

    #[inline(always)]
    unsafe fn load_aligned(ptr: *const f32) -> Self {
        debug_assert!(Self::is_aligned(ptr));
        F32x4 {
            elements: unsafe { vld1q_f32(ptr) },
        }
    }

    #[inline(always)]
    unsafe fn store_aligned(&self, ptr: *mut f32) {
        debug_assert!(Self::is_aligned(ptr));
        unsafe { vst1q_f32(ptr, self.elements) }
    }

    #[inline(always)]
    fn first(&self) -> f32 {
        unsafe { vgetq_lane_f32::<0>(self.elements) }
    }

    #[inline(always)]
    fn rotate_lanes<const N: usize>(&self) -> Self {
        let v = self.elements;
        let elements = unsafe {
            match N % LANE_COUNT {
                1 => vextq_f32::<1>(v, v),
                2 => vextq_f32::<2>(v, v),
                3 => vextq_f32::<3>(v, v),
                _ => v,
            }
        };
        F32x4 { elements }
    }

    #[inline(always)]
    fn rsqrt_estimate(&self) -> Self {
        // frsqrte(±0) is ±inf; fmin and fmax propagate NaN
        let elements = unsafe {
            let estimate = vrsqrteq_f32(self.elements);
            let clamped = vminq_f32(vdupq_n_f32(f32::MAX), estimate);
            vmaxq_f32(vdupq_n_f32(-f32::MAX), clamped)
        };
        F32x4 { elements }
    }
}

impl Add for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        F32x4 {
            elements: unsafe { vaddq_f32(self.elements, rhs.elements) },
        }
    }
}

impl Mul for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        F32x4 {
            elements: unsafe { vmulq_f32(self.elements, rhs.elements) },
        }
    }
}

impl fmt::Debug for F32x4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("F32x4").field(&self.to_array()).finish()
    }
}
