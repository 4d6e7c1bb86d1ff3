//! Portable four-lane register.
//!
//! Always compiled: it is the backend on targets without SSE or NEON, and
//! the reference the hardware backends are tested against everywhere else.
//! The reciprocal-square-root estimate models a 12-bit hardware lookup by
//! truncating the exact result to 12 significant fraction bits.

use std::ops::{Add, Mul};

use crate::simd::traits::SimdVec;
use crate::simd::{LANE_ALIGNMENT, LANE_COUNT};

// keeps the sign, the exponent and the top 12 fraction bits
const ESTIMATE_MASK: u32 = 0xFFFF_F800;

/// Scalar reciprocal-square-root estimate with the same special-value rules
/// as the hardware backends.
#[inline]
pub fn rsqrt_estimate(x: f32) -> f32 {
    if x.is_nan() || x < 0.0 {
        return f32::NAN;
    }
    if x == 0.0 || x.is_subnormal() {
        return f32::MAX.copysign(x);
    }
    if x.is_infinite() {
        return 0.0;
    }
    let exact = 1.0 / x.sqrt();
    f32::from_bits(exact.to_bits() & ESTIMATE_MASK)
}

/// A SIMD vector of 4 32-bit floating point values
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C, align(16))]
pub struct F32x4 {
    elements: [f32; LANE_COUNT],
}

impl F32x4 {
    pub const fn new(elements: [f32; LANE_COUNT]) -> Self {
        F32x4 { elements }
    }

    pub fn to_array(self) -> [f32; LANE_COUNT] {
        self.elements
    }

    #[inline(always)]
    fn map2(self, rhs: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut elements = [0.0; LANE_COUNT];
        for (i, lane) in elements.iter_mut().enumerate() {
            *lane = f(self.elements[i], rhs.elements[i]);
        }
        F32x4 { elements }
    }
}

impl SimdVec<f32> for F32x4 {
    const LANE_COUNT: usize = LANE_COUNT;
    const ALIGNMENT: usize = LANE_ALIGNMENT;
    const BACKEND: &'static str = "portable";
    const RSQRT_ESTIMATE_MAX_REL_ERROR: f32 = 1.0 / 4096.0;

    #[inline(always)]
    fn splat(value: f32) -> Self {
        F32x4 {
            elements: [value; LANE_COUNT],
        }
    }

    #[inline(always)]
    unsafe fn load_aligned(ptr: *const f32) -> Self {
        debug_assert!(Self::is_aligned(ptr));
        F32x4 {
            elements: unsafe { *(ptr as *const [f32; LANE_COUNT]) },
        }
    }

    #[inline(always)]
    unsafe fn store_aligned(&self, ptr: *mut f32) {
        debug_assert!(Self::is_aligned(ptr));
        unsafe { *(ptr as *mut [f32; LANE_COUNT]) = self.elements };
    }

    #[inline(always)]
    fn first(&self) -> f32 {
        self.elements[0]
    }

    #[inline(always)]
    fn rotate_lanes<const N: usize>(&self) -> Self {
        let mut elements = self.elements;
        elements.rotate_left(N % LANE_COUNT);
        F32x4 { elements }
    }

    #[inline(always)]
    fn rsqrt_estimate(&self) -> Self {
        F32x4 {
            elements: self.elements.map(rsqrt_estimate),
        }
    }
}

impl Add for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self::Output {
        self.map2(rhs, |a, b| a + b)
    }
}

impl Mul for F32x4 {
    type Output = Self;

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self::Output {
        self.map2(rhs, |a, b| a * b)
    }
}
