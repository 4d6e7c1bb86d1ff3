use std::ops::{Add, Mul};

/// A lane-parallel register of `T`.
///
/// Every backend is a single hardware register on the targets it is built
/// for. Only the operations the offload kernel needs are exposed: aligned
/// load and store, lane-wise add and multiply, lane rotation and a
/// reciprocal-square-root estimate.
pub trait SimdVec<T: Copy>: Copy + Add<Output = Self> + Mul<Output = Self> {
    /// Number of lanes in the register.
    const LANE_COUNT: usize;

    /// Required alignment, in bytes, of [`load_aligned`](Self::load_aligned)
    /// and [`store_aligned`](Self::store_aligned) pointers.
    const ALIGNMENT: usize;

    /// Short backend name, used in logs and benchmark ids.
    const BACKEND: &'static str;

    /// Upper bound on `|estimate - 1/sqrt(x)| * sqrt(x)` for finite normal
    /// `x > 0`.
    const RSQRT_ESTIMATE_MAX_REL_ERROR: f32;

    /// Creates a register with every lane set to `value`.
    fn splat(value: T) -> Self;

    /// Checks if the pointer is aligned to [`ALIGNMENT`](Self::ALIGNMENT).
    #[inline(always)]
    fn is_aligned(ptr: *const T) -> bool {
        (ptr as usize) % Self::ALIGNMENT == 0
    }

    /// Loads [`LANE_COUNT`](Self::LANE_COUNT) values.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reading `LANE_COUNT` values and aligned to
    /// [`ALIGNMENT`](Self::ALIGNMENT).
    unsafe fn load_aligned(ptr: *const T) -> Self;

    /// Stores every lane.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writing `LANE_COUNT` values and aligned to
    /// [`ALIGNMENT`](Self::ALIGNMENT).
    unsafe fn store_aligned(&self, ptr: *mut T);

    /// Loads a register from an aligned slice of exactly `LANE_COUNT` values.
    ///
    /// # Panics
    ///
    /// Panics if the slice has the wrong length or is not aligned.
    #[inline(always)]
    fn from_aligned_slice(slice: &[T]) -> Self {
        assert!(
            slice.len() == Self::LANE_COUNT,
            "Size must be == {}",
            Self::LANE_COUNT
        );
        assert!(
            Self::is_aligned(slice.as_ptr()),
            "Pointer must be aligned to {} bytes",
            Self::ALIGNMENT
        );
        unsafe { Self::load_aligned(slice.as_ptr()) }
    }

    /// Stores every lane into an aligned slice of exactly `LANE_COUNT` values.
    ///
    /// # Panics
    ///
    /// Panics if the slice has the wrong length or is not aligned.
    #[inline(always)]
    fn store_aligned_slice(&self, slice: &mut [T]) {
        assert!(
            slice.len() == Self::LANE_COUNT,
            "Size must be == {}",
            Self::LANE_COUNT
        );
        assert!(
            Self::is_aligned(slice.as_ptr()),
            "Pointer must be aligned to {} bytes",
            Self::ALIGNMENT
        );
        unsafe { self.store_aligned(slice.as_mut_ptr()) }
    }

    /// Lane 0 of the register.
    fn first(&self) -> T;

    /// Rotates lanes towards lane 0: lane `i` of the result is lane
    /// `(i + N) % LANE_COUNT` of `self`.
    fn rotate_lanes<const N: usize>(&self) -> Self;

    /// Per-lane estimate of `1 / sqrt(x)`, without refinement.
    ///
    /// Zero and subnormal lanes saturate to the largest finite value with the
    /// sign of the input. Negative and NaN lanes produce NaN.
    fn rsqrt_estimate(&self) -> Self;
}
