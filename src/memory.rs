//! The control processor's effective-address space.
//!
//! Main storage is one zeroed arena mapped at [`MAIN_STORAGE_BASE`]. Blocks
//! are handed out in whole [`STORAGE_LINE`]s; any access that leaves the
//! arena or touches a line that is not part of a live block is rejected with
//! [`OffloadError::InvalidEffectiveAddress`]. The transfer engine goes through
//! the same checks, which is how a bad address becomes a co-processor fault
//! instead of a host crash.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::Pod;
use tracing::debug;

use crate::error::{allocation_error, layout_error, OffloadError, Result};
use crate::utils::AlignedBuffer;

/// First valid effective address. Address 0 is never mapped.
pub const MAIN_STORAGE_BASE: u64 = 0x1000_0000;

/// Allocation granularity of main storage, in bytes.
pub const STORAGE_LINE: usize = 128;

/// An address in main storage as seen by the transfer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EffectiveAddress(pub u64);

impl EffectiveAddress {
    pub const NULL: EffectiveAddress = EffectiveAddress(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_aligned(self, align: usize) -> bool {
        align.is_power_of_two() && self.0 % align as u64 == 0
    }

    pub fn offset(self, bytes: u64) -> EffectiveAddress {
        EffectiveAddress(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for EffectiveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<EffectiveAddress> for u64 {
    fn from(ea: EffectiveAddress) -> u64 {
        ea.0
    }
}

struct Arena {
    bytes: AlignedBuffer,
    // one flag per line, set while the line belongs to a live block
    lines: Vec<bool>,
    // first line of each live block -> number of lines
    blocks: BTreeMap<usize, usize>,
}

impl Arena {
    fn offset_of(&self, ea: u64, len: usize) -> Result<usize> {
        let invalid = OffloadError::InvalidEffectiveAddress { ea, len };
        if len == 0 || ea < MAIN_STORAGE_BASE {
            return Err(invalid);
        }
        let start = usize::try_from(ea - MAIN_STORAGE_BASE).map_err(|_| invalid.clone())?;
        let end = start.checked_add(len).ok_or_else(|| invalid.clone())?;
        if end > self.bytes.len() {
            return Err(invalid);
        }
        let first = start / STORAGE_LINE;
        let last = (end - 1) / STORAGE_LINE;
        if self.lines[first..=last].iter().all(|&live| live) {
            Ok(start)
        } else {
            Err(invalid)
        }
    }
}

/// Line-granular, bounds-checked main storage shared by the control
/// processor and every transfer engine of a machine.
pub struct MainStorage {
    arena: Mutex<Arena>,
    capacity: usize,
}

impl MainStorage {
    /// Maps `capacity` bytes of zeroed storage at [`MAIN_STORAGE_BASE`].
    ///
    /// `capacity` must be a nonzero multiple of [`STORAGE_LINE`].
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        if capacity == 0 || capacity % STORAGE_LINE != 0 {
            return Err(layout_error(
                capacity,
                STORAGE_LINE,
                "main storage capacity must be a nonzero multiple of the line size",
            ));
        }
        let bytes = AlignedBuffer::zeroed(capacity, STORAGE_LINE)?;
        let arena = Arena {
            bytes,
            lines: vec![false; capacity / STORAGE_LINE],
            blocks: BTreeMap::new(),
        };
        Ok(Arc::new(MainStorage {
            arena: Mutex::new(arena),
            capacity,
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held by live blocks, rounded up to whole lines.
    pub fn allocated_bytes(&self) -> usize {
        self.lock().blocks.values().sum::<usize>() * STORAGE_LINE
    }

    /// Allocates a zeroed block of at least `len` bytes whose effective
    /// address is a multiple of `align`.
    ///
    /// `align` must be a power of two; alignments below one line are rounded
    /// up to the line size.
    pub fn allocate(&self, len: usize, align: usize) -> Result<EffectiveAddress> {
        if len == 0 {
            return Err(layout_error(len, align, "block length must be nonzero"));
        }
        if !align.is_power_of_two() {
            return Err(layout_error(len, align, "alignment must be power of two"));
        }
        let align = align.max(STORAGE_LINE);
        let count = len.div_ceil(STORAGE_LINE);
        let step = align / STORAGE_LINE;

        let mut arena = self.lock();
        let total = arena.lines.len();
        let mut first = 0;
        while first + count <= total {
            if arena.lines[first..first + count].iter().all(|&live| !live) {
                arena.lines[first..first + count].fill(true);
                arena.blocks.insert(first, count);
                let start = first * STORAGE_LINE;
                arena.bytes[start..start + count * STORAGE_LINE].fill(0);

                let ea = EffectiveAddress(MAIN_STORAGE_BASE + start as u64);
                debug!(%ea, len, align, "allocated main storage block");
                return Ok(ea);
            }
            first += step;
        }

        Err(allocation_error(len, align, "main storage exhausted"))
    }

    /// Returns the block starting at `ea` to the free pool.
    pub fn release(&self, ea: EffectiveAddress) -> Result<()> {
        let invalid = OffloadError::InvalidEffectiveAddress { ea: ea.0, len: 0 };
        if ea.0 < MAIN_STORAGE_BASE || (ea.0 - MAIN_STORAGE_BASE) % STORAGE_LINE as u64 != 0 {
            return Err(invalid);
        }
        let first = ((ea.0 - MAIN_STORAGE_BASE) / STORAGE_LINE as u64) as usize;

        let mut arena = self.lock();
        let count = arena.blocks.remove(&first).ok_or(invalid)?;
        arena.lines[first..first + count].fill(false);
        debug!(%ea, bytes = count * STORAGE_LINE, "released main storage block");
        Ok(())
    }

    /// Copies `dst.len()` bytes starting at `ea` into `dst`.
    pub fn read(&self, ea: EffectiveAddress, dst: &mut [u8]) -> Result<()> {
        let arena = self.lock();
        let start = arena.offset_of(ea.0, dst.len())?;
        dst.copy_from_slice(&arena.bytes[start..start + dst.len()]);
        Ok(())
    }

    /// Copies `src` into main storage starting at `ea`.
    pub fn write(&self, ea: EffectiveAddress, src: &[u8]) -> Result<()> {
        let mut arena = self.lock();
        let start = arena.offset_of(ea.0, src.len())?;
        arena.bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    pub fn read_pod<T: Pod>(&self, ea: EffectiveAddress) -> Result<T> {
        let mut value = T::zeroed();
        self.read(ea, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn write_pod<T: Pod>(&self, ea: EffectiveAddress, value: &T) -> Result<()> {
        self.write(ea, bytemuck::bytes_of(value))
    }
}

impl fmt::Debug for MainStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainStorage")
            .field("base", &EffectiveAddress(MAIN_STORAGE_BASE))
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}
