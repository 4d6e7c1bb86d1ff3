//! The shared job descriptor and its owned handle.
//!
//! [`JobDescriptor`] is the wire layout both processors agree on: one
//! 128-byte block, 128-byte aligned, moved whole by a single transfer in each
//! direction. [`JobBuffer`] owns the block in main storage for the length of
//! one offload call and tracks which side currently owns its contents.

use std::fmt;
use std::mem;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::error::{OffloadError, Result};
use crate::memory::{EffectiveAddress, MainStorage};

/// Base alignment of the descriptor in both main storage and local store.
pub const DMA_ALIGNMENT: usize = 128;

/// Transfer granularity. The descriptor size is a multiple of it.
pub const DMA_GRANULARITY: usize = 16;

/// Value of `done` once the co-processor has finished the job.
pub const DONE_SENTINEL: u32 = 1;

/// The job block shared between the control processor and the co-processor.
///
/// | Offset | Field         | Size |
/// |--------|---------------|------|
/// | 0      | `input`       | 16   |
/// | 16     | `output`      | 16   |
/// | 32     | `dot_product` | 4    |
/// | 36     | `magnitude`   | 4    |
/// | 40     | `done`        | 4    |
/// | 44     | padding       | 84   |
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C, align(128))]
pub struct JobDescriptor {
    pub input: [f32; 4],
    pub output: [f32; 4],
    pub dot_product: f32,
    pub magnitude: f32,
    pub done: u32,
    pub pad: [u32; 21],
}

const _: () = assert!(mem::size_of::<JobDescriptor>() == DMA_ALIGNMENT);
const _: () = assert!(mem::align_of::<JobDescriptor>() == DMA_ALIGNMENT);
const _: () = assert!(mem::size_of::<JobDescriptor>() % DMA_GRANULARITY == 0);

// SAFETY: every field is plain `f32`/`u32` data and the asserts above pin
// the size to exactly the fields plus explicit padding, so the struct has no
// implicit padding bytes and any bit pattern is valid.
unsafe impl Zeroable for JobDescriptor {}
unsafe impl Pod for JobDescriptor {}

impl JobDescriptor {
    pub const SIZE: usize = mem::size_of::<JobDescriptor>();

    /// A fresh descriptor carrying `input`, with `done == 0`.
    pub fn new(input: [f32; 4]) -> Self {
        JobDescriptor {
            input,
            ..JobDescriptor::zeroed()
        }
    }

    pub fn is_done(&self) -> bool {
        self.done == DONE_SENTINEL
    }
}

impl Default for JobDescriptor {
    fn default() -> Self {
        JobDescriptor::zeroed()
    }
}

/// The values the co-processor produced for one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VecmathResult {
    pub input: [f32; 4],
    pub output: [f32; 4],
    pub dot_product: f32,
    pub magnitude: f32,
}

impl From<&JobDescriptor> for VecmathResult {
    fn from(job: &JobDescriptor) -> Self {
        VecmathResult {
            input: job.input,
            output: job.output,
            dot_product: job.dot_product,
            magnitude: job.magnitude,
        }
    }
}

/// Which processor may touch the descriptor's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Control,
    Coprocessor,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Control => f.write_str("control processor"),
            Owner::Coprocessor => f.write_str("co-processor"),
        }
    }
}

/// A job descriptor living in main storage, owned by one offload call.
///
/// The block is allocated aligned to [`DMA_ALIGNMENT`] and released on drop.
/// Between [`hand_off`](Self::hand_off) and [`reclaim`](Self::reclaim) the
/// contents belong to the co-processor and every read from the control side
/// fails with [`OffloadError::JobInFlight`].
pub struct JobBuffer {
    storage: Arc<MainStorage>,
    ea: EffectiveAddress,
    owner: Owner,
}

impl JobBuffer {
    /// Allocates a descriptor and writes `input` into it with `done == 0`.
    pub fn allocate(storage: &Arc<MainStorage>, input: [f32; 4]) -> Result<Self> {
        let ea = storage.allocate(JobDescriptor::SIZE, DMA_ALIGNMENT)?;
        let buffer = JobBuffer {
            storage: Arc::clone(storage),
            ea,
            owner: Owner::Control,
        };
        storage.write_pod(ea, &JobDescriptor::new(input))?;
        Ok(buffer)
    }

    pub fn effective_address(&self) -> EffectiveAddress {
        self.ea
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Transfers ownership to the co-processor and returns the address to
    /// pass as the thread argument.
    pub(crate) fn hand_off(&mut self) -> Result<EffectiveAddress> {
        if self.owner == Owner::Coprocessor {
            return Err(OffloadError::JobInFlight);
        }
        self.owner = Owner::Coprocessor;
        Ok(self.ea)
    }

    /// Returns ownership to the control processor. Only called once the
    /// group has been joined.
    pub(crate) fn reclaim(&mut self) {
        self.owner = Owner::Control;
    }

    /// Copies the descriptor out of main storage.
    pub fn snapshot(&self) -> Result<JobDescriptor> {
        if self.owner == Owner::Coprocessor {
            return Err(OffloadError::JobInFlight);
        }
        self.storage.read_pod(self.ea)
    }

    /// The co-processor's results, or `None` if it never marked the job done.
    pub fn result(&self) -> Result<Option<VecmathResult>> {
        let job = self.snapshot()?;
        Ok(job.is_done().then(|| VecmathResult::from(&job)))
    }
}

impl Drop for JobBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.storage.release(self.ea) {
            warn!(ea = %self.ea, error = %e, "failed to release job descriptor");
        }
    }
}

impl fmt::Debug for JobBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobBuffer")
            .field("ea", &self.ea)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_descriptor_layout() {
        assert_eq!(offset_of!(JobDescriptor, input), 0);
        assert_eq!(offset_of!(JobDescriptor, output), 16);
        assert_eq!(offset_of!(JobDescriptor, dot_product), 32);
        assert_eq!(offset_of!(JobDescriptor, magnitude), 36);
        assert_eq!(offset_of!(JobDescriptor, done), 40);
        assert_eq!(offset_of!(JobDescriptor, pad), 44);
        assert_eq!(JobDescriptor::SIZE, 128);
    }

    #[test]
    fn test_new_descriptor_is_not_done() {
        let job = JobDescriptor::new([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(job.done, 0);
        assert!(!job.is_done());
        assert_eq!(job.output, [0.0; 4]);
    }

    #[test]
    fn test_buffer_is_aligned_and_populated() {
        let storage = MainStorage::new(4096).unwrap();
        let buffer = JobBuffer::allocate(&storage, [1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(buffer.effective_address().is_aligned(DMA_ALIGNMENT));
        assert_eq!(buffer.owner(), Owner::Control);

        let job = buffer.snapshot().unwrap();
        assert_eq!(job.input, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(job.done, 0);
        assert_eq!(buffer.result().unwrap(), None);
    }

    #[test]
    fn test_reads_fail_while_in_flight() {
        let storage = MainStorage::new(4096).unwrap();
        let mut buffer = JobBuffer::allocate(&storage, [0.0; 4]).unwrap();

        let ea = buffer.hand_off().unwrap();
        assert_eq!(ea, buffer.effective_address());
        assert_eq!(buffer.snapshot(), Err(OffloadError::JobInFlight));
        assert_eq!(buffer.result(), Err(OffloadError::JobInFlight));
        assert_eq!(buffer.hand_off(), Err(OffloadError::JobInFlight));

        buffer.reclaim();
        assert!(buffer.snapshot().is_ok());
    }

    #[test]
    fn test_drop_releases_block() {
        let storage = MainStorage::new(4096).unwrap();
        let ea = {
            let buffer = JobBuffer::allocate(&storage, [0.0; 4]).unwrap();
            buffer.effective_address()
        };
        assert_eq!(storage.allocated_bytes(), 0);
        assert!(storage.read_pod::<JobDescriptor>(ea).is_err());
    }

    #[test]
    fn test_result_when_done() {
        let storage = MainStorage::new(4096).unwrap();
        let buffer = JobBuffer::allocate(&storage, [1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut job = buffer.snapshot().unwrap();
        job.output = [1.0, 4.0, 9.0, 16.0];
        job.dot_product = 30.0;
        job.magnitude = 5.477;
        job.done = DONE_SENTINEL;
        storage.write_pod(buffer.effective_address(), &job).unwrap();

        let result = buffer.result().unwrap().unwrap();
        assert_eq!(result.output, [1.0, 4.0, 9.0, 16.0]);
        assert_eq!(result.dot_product, 30.0);
    }
}
