use std::sync::{Mutex, MutexGuard, PoisonError};

use bytemuck::Pod;

use crate::coproc::image::{Image, SegmentKind};
use crate::error::{DmaFault, Result};
use crate::utils::AlignedBuffer;

/// Size of one execution unit's private memory.
pub const LOCAL_STORE_SIZE: usize = 256 * 1024;

/// Base alignment of the local store. Any local address that is a multiple
/// of this is a multiple of it in host memory too.
pub const LOCAL_STORE_ALIGNMENT: usize = 128;

/// Private memory of one execution unit.
///
/// Shared between the unit's program and its transfer engine; each access
/// takes the store's lock for the length of one copy.
pub struct LocalStore {
    bytes: Mutex<AlignedBuffer>,
}

fn range(lsa: u32, size: usize) -> std::result::Result<std::ops::Range<usize>, DmaFault> {
    let start = lsa as usize;
    match start.checked_add(size) {
        Some(end) if end <= LOCAL_STORE_SIZE => Ok(start..end),
        _ => Err(DmaFault::LocalStoreRange { lsa, size }),
    }
}

impl LocalStore {
    /// A zeroed local store.
    pub fn new() -> Result<Self> {
        Ok(LocalStore {
            bytes: Mutex::new(AlignedBuffer::zeroed(
                LOCAL_STORE_SIZE,
                LOCAL_STORE_ALIGNMENT,
            )?),
        })
    }

    /// A zeroed local store with every segment of `image` loaded.
    pub fn with_image(image: &Image) -> Result<Self> {
        let store = LocalStore::new()?;
        {
            let mut bytes = store.lock();
            for segment in image.segments() {
                // bss is already zero
                if segment.kind() == SegmentKind::Bss {
                    continue;
                }
                let start = segment.lsa() as usize;
                bytes[start..start + segment.data().len()].copy_from_slice(segment.data());
            }
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, AlignedBuffer> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self, lsa: u32, dst: &mut [u8]) -> std::result::Result<(), DmaFault> {
        let range = range(lsa, dst.len())?;
        dst.copy_from_slice(&self.lock()[range]);
        Ok(())
    }

    pub fn write(&self, lsa: u32, src: &[u8]) -> std::result::Result<(), DmaFault> {
        let range = range(lsa, src.len())?;
        self.lock()[range].copy_from_slice(src);
        Ok(())
    }

    pub fn read_pod<T: Pod>(&self, lsa: u32) -> std::result::Result<T, DmaFault> {
        let mut value = T::zeroed();
        self.read(lsa, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn write_pod<T: Pod>(&self, lsa: u32, value: &T) -> std::result::Result<(), DmaFault> {
        self.write(lsa, bytemuck::bytes_of(value))
    }

    /// Runs `f` on a typed view of local store in place.
    ///
    /// Fails with [`DmaFault::MisalignedView`] if `lsa` is not aligned for `T`.
    pub fn with_mut<T: Pod, R>(
        &self,
        lsa: u32,
        f: impl FnOnce(&mut T) -> R,
    ) -> std::result::Result<R, DmaFault> {
        let size = std::mem::size_of::<T>();
        let range = range(lsa, size)?;
        let mut bytes = self.lock();
        let value = bytemuck::try_from_bytes_mut::<T>(&mut bytes[range])
            .map_err(|_| DmaFault::MisalignedView {
                lsa,
                size,
                align: std::mem::align_of::<T>(),
            })?;
        Ok(f(value))
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("size", &LOCAL_STORE_SIZE)
            .finish()
    }
}
