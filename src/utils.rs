use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::error::{allocation_error, layout_error, Result};

/// A zero-initialized byte buffer with an explicit alignment.
///
/// Backs both the effective-address space and every local store. The
/// alignment of the first byte is the hard guarantee DMA checks rely on:
/// an offset that is a multiple of `align` inside the buffer is a host
/// address that is a multiple of `align` too.
///
/// # Memory Safety
///
/// - Allocated with `std::alloc::alloc_zeroed()` and freed with
///   `std::alloc::dealloc()` using the same layout
/// - The buffer is never reallocated, so its base pointer is stable for its
///   whole lifetime
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    /// Allocates `len` zeroed bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// - [`LayoutError`](crate::error::OffloadError::LayoutError) if `len` is
    ///   zero or `align` is not a power of two
    /// - [`AllocationError`](crate::error::OffloadError::AllocationError) if
    ///   the system allocator returns null
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        if len == 0 {
            return Err(layout_error(len, align, "buffer length must be nonzero"));
        }
        if !align.is_power_of_two() {
            return Err(layout_error(len, align, "alignment must be power of two"));
        }

        let layout = Layout::from_size_align(len, align)
            .map_err(|e| layout_error(len, align, e.to_string()))?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| allocation_error(len, align, "system allocator returned null"))?;

        Ok(AlignedBuffer { ptr, layout })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

// The buffer owns its allocation exclusively; shared access goes through
// `&[u8]`, mutation through `&mut`.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("align", &self.align())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OffloadError;

    #[test]
    fn test_zeroed_is_aligned_and_zero() {
        for align in [16, 128, 4096] {
            let buffer = AlignedBuffer::zeroed(1024, align).unwrap();
            assert_eq!(buffer.as_ptr() as usize % align, 0);
            assert_eq!(buffer.len(), 1024);
            assert!(buffer.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_zeroed_rejects_bad_layout() {
        assert!(matches!(
            AlignedBuffer::zeroed(0, 16),
            Err(OffloadError::LayoutError { .. })
        ));
        assert!(matches!(
            AlignedBuffer::zeroed(64, 24),
            Err(OffloadError::LayoutError { .. })
        ));
    }

    #[test]
    fn test_write_through_deref_mut() {
        let mut buffer = AlignedBuffer::zeroed(32, 16).unwrap();
        buffer[..4].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&buffer[..5], &[1, 2, 3, 4, 0]);
    }
}
