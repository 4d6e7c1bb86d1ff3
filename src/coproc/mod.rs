//! A simulated vector co-processor.
//!
//! The model follows the shape of a DMA-only accelerator attached to a
//! general-purpose control processor:
//!
//! - a [`Machine`] with a fixed number of execution units, one shared
//!   [`MainStorage`](crate::memory::MainStorage) and a [`KernelRegistry`] of
//!   native programs that images can name,
//! - a [`Runtime`] that reserves units for the length of its life,
//! - [`ImageHandle`]s parsed from image blobs,
//! - [`ThreadGroup`]s that run one OS thread per execution unit, each with a
//!   private [`LocalStore`] and its own [`Mfc`] transfer engine.
//!
//! Kernels never touch main storage directly. They see a [`UnitContext`] and
//! move data with tagged asynchronous transfers.

pub mod group;
pub mod image;
pub mod local_store;
pub mod machine;
pub mod mfc;
pub mod runtime;
pub mod unit;

pub use group::{
    GroupExit, GroupState, JoinCause, ThreadArgument, ThreadAttribute, ThreadExit, ThreadGroup,
    ThreadId, TERMINATED_STATUS,
};
pub use image::{Image, ImageBuilder, ImageHandle, Segment, SegmentKind};
pub use local_store::{LocalStore, LOCAL_STORE_SIZE};
pub use machine::{Kernel, KernelRegistry, Machine};
pub use mfc::{Direction, Mfc, TAG_COUNT};
pub use runtime::Runtime;
pub use unit::UnitContext;
