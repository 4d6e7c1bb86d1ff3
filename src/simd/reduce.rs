//! Sum of squares, horizontal sum and magnitude of one four-lane batch.
//!
//! The horizontal sum is a two-step butterfly:
//!
//! ```text
//! v     = [a, b, c, d]
//! sum1  = v + rot1(v)       = [a+b, b+c, c+d, d+a]
//! sum2  = sum1 + rot2(sum1) = [a+b+c+d, ...]
//! ```
//!
//! Lane 0 of `sum2` is the total. The total is then brought into the normal
//! range (a subnormal sum flushes to zero, an overflowed sum saturates to
//! `f32::MAX`) and the magnitude is `dot * rsqrt_estimate(dot)`, a single
//! estimate with no Newton-Raphson step.

use crate::simd::traits::SimdVec;
use crate::simd::{F32x4, LANE_COUNT};

/// Four lanes in a 16-byte aligned memory image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C, align(16))]
pub struct Lanes(pub [f32; LANE_COUNT]);

/// Everything the kernel computes for one input vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    /// `input[i] * input[i]`.
    pub squares: [f32; LANE_COUNT],
    /// Sum of `squares`, flushed or saturated to the normal range.
    pub dot_product: f32,
    /// Estimate of `sqrt(dot_product)`.
    pub magnitude: f32,
}

/// Sums the lanes of `v` with two rotate-and-add steps.
#[inline(always)]
pub fn horizontal_sum<V: SimdVec<f32>>(v: V) -> f32 {
    let sum1 = v + v.rotate_lanes::<1>();
    let sum2 = sum1 + sum1.rotate_lanes::<2>();
    sum2.first()
}

/// Flushes a subnormal total to zero and saturates an overflowed one.
///
/// NaN passes through.
#[inline(always)]
pub fn normalize_total(total: f32) -> f32 {
    if total == f32::INFINITY {
        f32::MAX
    } else if total.is_subnormal() {
        0.0
    } else {
        total
    }
}

/// Runs the reduction on backend `V`.
#[inline]
pub fn reduce_with<V: SimdVec<f32>>(input: &Lanes) -> Reduction {
    let v = V::from_aligned_slice(&input.0);
    let squared = v * v;

    let mut squares = Lanes::default();
    squared.store_aligned_slice(&mut squares.0);

    let dot_product = normalize_total(horizontal_sum(squared));
    let dot = V::splat(dot_product);
    let magnitude = (dot * dot.rsqrt_estimate()).first();

    Reduction {
        squares: squares.0,
        dot_product,
        magnitude,
    }
}

/// Runs the reduction on the backend selected for this target.
#[inline]
pub fn reduce(input: &Lanes) -> Reduction {
    reduce_with::<F32x4>(input)
}

/// Copies `values` into an aligned image and reduces them.
pub fn reduce_values(values: [f32; LANE_COUNT]) -> Reduction {
    reduce(&Lanes(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd::portable;

    #[test]
    fn test_reference_vector() {
        let r = reduce_values([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(r.squares, [1.0, 4.0, 9.0, 16.0]);
        assert_eq!(r.dot_product, 30.0);
        let exact = 30.0f32.sqrt();
        let relative = ((r.magnitude - exact) / exact).abs();
        assert!(relative <= F32x4::RSQRT_ESTIMATE_MAX_REL_ERROR + f32::EPSILON);
    }

    #[test]
    fn test_zero_vector_has_zero_magnitude() {
        let r = reduce_values([0.0; 4]);
        assert_eq!(r.squares, [0.0; 4]);
        assert_eq!(r.dot_product, 0.0);
        assert_eq!(r.magnitude, 0.0);
        assert!(!r.magnitude.is_nan());

        let r = reduce_values([-0.0; 4]);
        assert_eq!(r.magnitude, 0.0);
    }

    #[test]
    fn test_horizontal_sum_uses_every_lane() {
        let v = portable::F32x4::new([1.0, 10.0, 100.0, 1000.0]);
        assert_eq!(horizontal_sum(v), 1111.0);
    }

    #[test]
    fn test_portable_matches_selected_backend_on_exact_values() {
        let input = Lanes([-3.0, 0.5, 2.0, 8.0]);
        let selected = reduce(&input);
        let reference = reduce_with::<portable::F32x4>(&input);
        assert_eq!(selected.squares, reference.squares);
        assert_eq!(selected.dot_product, reference.dot_product);
    }

    #[test]
    fn test_subnormal_total_is_flushed() {
        let r = reduce_values([1e-20, 0.0, 0.0, 0.0]);
        assert_eq!(r.squares[0], 1e-20f32 * 1e-20f32);
        assert_eq!(r.dot_product, 0.0);
        assert_eq!(r.magnitude, 0.0);
    }

    #[test]
    fn test_overflowed_total_saturates() {
        let r = reduce_values([3e19, 0.0, 0.0, 0.0]);
        assert_eq!(r.squares[0], f32::INFINITY);
        assert_eq!(r.dot_product, f32::MAX);
        assert!(r.magnitude.is_finite());
    }

    #[test]
    fn test_normalize_total() {
        assert_eq!(normalize_total(f32::INFINITY), f32::MAX);
        assert_eq!(normalize_total(f32::MIN_POSITIVE / 2.0), 0.0);
        assert_eq!(normalize_total(f32::MIN_POSITIVE), f32::MIN_POSITIVE);
        assert_eq!(normalize_total(0.0), 0.0);
        assert!(normalize_total(f32::NAN).is_nan());
    }
}
