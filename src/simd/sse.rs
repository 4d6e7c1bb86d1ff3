//! SSE four-lane register (`__m128`).
//!
//! | Operation          | Instruction      |
//! |--------------------|------------------|
//! | aligned load/store | `movaps`         |
//! | add / multiply     | `addps` / `mulps`|
//! | lane rotation      | `shufps`         |
//! | rsqrt estimate     | `rsqrtps`        |
//!
//! `rsqrtps` has a documented maximum relative error of 1.5 × 2⁻¹².

use std::arch::x86_64::*;
use std::fmt;
use std::ops::{Add, Mul};

use crate::simd::traits::SimdVec;
use crate::simd::{LANE_ALIGNMENT, LANE_COUNT};

// _MM_SHUFFLE masks selecting lanes (i + N) % 4
const ROTATE_1: i32 = 0b00_11_10_01;
const ROTATE_2: i32 = 0b01_00_11_10;
const ROTATE_3: i32 = 0b10_01_00_11;

/// A SIMD vector of 4 32-bit floating point values
#[derive(Copy, Clone)]
pub struct F32x4 {
    elements: __m128,
}

impl F32x4 {
    #[inline(always)]
    pub fn new(elements: [f32; LANE_COUNT]) -> Self {
        F32x4 {
            elements: unsafe { _mm_loadu_ps(elements.as_ptr()) },
        }
    }

    #[inline(always)]
    pub fn to_array(self) -> [f32; LANE_COUNT] {
        let mut out = [0.0f32; LANE_COUNT];
        unsafe { _mm_storeu_ps(out.as_mut_ptr(), self.elements) };
        out
    }
}

impl SimdVec<f32> for F32x4 {
    const LANE_COUNT: usize = LANE_COUNT;
    const ALIGNMENT: usize = LANE_ALIGNMENT;
    const BACKEND: &'static str = "sse";
    const RSQRT_ESTIMATE_MAX_REL_ERROR: f32 = 1.5 / 4096.0;

    #[inline(always)]
    fn splat(value: f32) -> Self {
        F32x4 {
            elements: unsafe { _mm_set1_ps(value) },
        }
    }

    #[inline(always)]
    unsafe fn load_aligned(ptr: *const f32) -> Self {
        debug_assert!(Self::is_aligned(ptr));
        F32x4 {
            elements: unsafe { _mm_load_ps(ptr) },
        }
    }

    #[inline(always)]
    unsafe fn store_aligned(&self, ptr: *mut f32) {
        debug_assert!(Self::is_aligned(ptr));
        unsafe { _mm_store_ps(ptr, self.elements) }
    }

    #[inline(always)]
    fn first(&self) -> f32 {
        unsafe { _mm_cvtss_f32(self.elements) }
    }

    #[inline(always)]
    fn rotate_lanes<const N: usize>(&self) -> Self {
        let v = self.elements;
        let elements = unsafe {
            match N % LANE_COUNT {
                1 => _mm_shuffle_ps::<ROTATE_1>(v, v),
                2 => _mm_shuffle_ps::<ROTATE_2>(v, v),
                3 => _mm_shuffle_ps::<ROTATE_3>(v, v),
                _ => v,
            }
        };
        F32x4 { elements }
    }

    #[inline(always)]
    fn rsqrt_estimate(&self) -> Self {
        // rsqrtps(±0) is ±inf. minps/maxps return their second operand when
        // either is NaN, so NaN lanes survive the clamp.
        let elements = unsafe {
            let estimate = _mm_rsqrt_ps(self.elements);
            let clamped = _mm_min_ps(_mm_set1_ps(f32::MAX), estimate);
            _mm_max_ps(_mm_set1_ps(-f32::MAX), clamped)
        };
        F32x4 { elements }
    }
}

impl Add for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        F32x4 {
            elements: unsafe { _mm_add_ps(self.elements, rhs.elements) },
        }
    }
}

impl Mul for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        F32x4 {
            elements: unsafe { _mm_mul_ps(self.elements, rhs.elements) },
        }
    }
}

impl fmt::Debug for F32x4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("F32x4").field(&self.to_array()).finish()
    }
}
