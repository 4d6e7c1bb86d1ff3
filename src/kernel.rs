//! The vector-math co-processor kernel.
//!
//! One run moves the job descriptor through the unit:
//!
//! 1. `get` the descriptor from `arg0` into local store, wait on the tag
//! 2. square the input lanes, reduce them to the dot product, estimate the
//!    magnitude
//! 3. set `done`
//! 4. `put` the descriptor back on the same tag, wait
//!
//! Where the private copy lives and which tag is used come from the
//! [`KernelParams`] block the image loads at [`PARAMS_LSA`].

use bytemuck::{Pod, Zeroable};
use tracing::trace;

use crate::coproc::{ThreadArgument, UnitContext};
use crate::error::DmaFault;
use crate::job::{JobDescriptor, DMA_ALIGNMENT, DONE_SENTINEL};
use crate::simd::{reduce_with, F32x4, Lanes, SimdVec};

/// Entry symbol of the vecmath kernel.
pub const VECMATH_ENTRY: &str = "vecmath_main";

/// Local-store address of the [`KernelParams`] block.
pub const PARAMS_LSA: u32 = 0x80;

/// Tag the embedded image uses for both transfers.
pub const DEFAULT_DMA_TAG: u32 = 1;

/// Local-store address of the private descriptor copy in the embedded image.
pub const DEFAULT_JOB_LSA: u32 = 0x100;

/// The embedded kernel image, written by the build script.
pub static EMBEDDED_IMAGE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/vecmath.img"));

pub fn embedded_image() -> &'static [u8] {
    EMBEDDED_IMAGE
}

pub fn embedded_image_size() -> usize {
    EMBEDDED_IMAGE.len()
}

/// Kernel parameters loaded from the image's data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct KernelParams {
    pub dma_tag: u32,
    pub job_lsa: u32,
    pub reserved: [u32; 2],
}

impl KernelParams {
    pub fn new(dma_tag: u32, job_lsa: u32) -> Self {
        KernelParams {
            dma_tag,
            job_lsa,
            reserved: [0; 2],
        }
    }

    /// The data segment payload for these parameters.
    pub fn to_segment(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }
}

/// Computes one job with the lane backend selected for this target.
pub fn vecmath_main(ctx: &mut UnitContext, argument: ThreadArgument) -> Result<i32, DmaFault> {
    vecmath_with::<F32x4>(ctx, argument)
}

/// The kernel body, generic over the lane backend.
pub fn vecmath_with<V: SimdVec<f32>>(ctx: &mut UnitContext, argument: ThreadArgument) -> Result<i32, DmaFault> {
    let params: KernelParams = ctx.read_local(PARAMS_LSA)?;
    let ea = argument.address();
    let lsa = params.job_lsa;
    let tag = params.dma_tag;
    let size = JobDescriptor::SIZE;

    // both copies must sit on the descriptor's alignment boundary
    if lsa as usize % DMA_ALIGNMENT != 0 || !ea.is_aligned(DMA_ALIGNMENT) {
        return Err(DmaFault::Misaligned {
            lsa,
            ea: ea.get(),
            size,
        });
    }

    ctx.get(lsa, ea, size, tag)?;
    ctx.wait(tag)?;
    trace!(unit = ctx.unit(), %ea, lsa, backend = V::BACKEND, "job descriptor pulled");

    ctx.with_local_mut::<JobDescriptor, _>(lsa, |job| {
        let reduction = reduce_with::<V>(&Lanes(job.input));
        job.output = reduction.squares;
        job.dot_product = reduction.dot_product;
        job.magnitude = reduction.magnitude;
        job.done = DONE_SENTINEL;
    })?;

    ctx.put(lsa, ea, size, tag)?;
    ctx.wait(tag)?;
    trace!(unit = ctx.unit(), %ea, "job descriptor pushed");

    Ok(0)
}
