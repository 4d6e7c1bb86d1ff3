//! Error types for offload operations.
//!
//! [`OffloadError`] is everything the control processor can observe directly:
//! allocation and layout failures, address-space violations, subsystem and
//! thread-group lifecycle errors and malformed images. Orchestrator failures
//! are wrapped in [`OffloadError::Stage`] so callers know which step failed.
//!
//! [`DmaFault`] is a co-processor-side fault. It never crosses to the control
//! processor as an object; the control side only sees its [`DmaFault::code`]
//! in the group exit status.

use std::fmt;

use thiserror::Error;

use crate::coproc::GroupState;

/// Orchestrator steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Allocate,
    Initialize,
    ImageImport,
    GroupCreate,
    ThreadCreate,
    Start,
    Join,
    Readback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Allocate => "job allocation",
            Stage::Initialize => "subsystem initialization",
            Stage::ImageImport => "image import",
            Stage::GroupCreate => "thread group creation",
            Stage::ThreadCreate => "thread creation",
            Stage::Start => "group start",
            Stage::Join => "group join",
            Stage::Readback => "result readback",
        };
        f.write_str(name)
    }
}

/// Errors that can occur on the control-processor side of an offload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffloadError {
    /// Memory allocation failed.
    #[error("Memory allocation failed: {message} (requested {requested_size} bytes with {requested_alignment} byte alignment)")]
    AllocationError {
        requested_size: usize,
        requested_alignment: usize,
        message: String,
    },

    /// Invalid layout parameters were provided.
    #[error("Invalid memory layout: {message} (size: {size}, alignment: {alignment})")]
    LayoutError {
        size: usize,
        alignment: usize,
        message: String,
    },

    /// Input validation error.
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// The range is outside main storage or touches unallocated lines.
    #[error("invalid effective address {ea:#x} for {len} bytes")]
    InvalidEffectiveAddress { ea: u64, len: usize },

    #[error("co-processor subsystem is already initialized")]
    AlreadyInitialized,

    #[error("requested {requested} execution units but only {available} are free")]
    NoFreeUnits { requested: usize, available: usize },

    #[error("malformed co-processor image at byte {offset}: {reason}")]
    MalformedImage { offset: usize, reason: &'static str },

    #[error("co-processor image handle is closed")]
    ImageClosed,

    #[error("image entry symbol `{0}` has no kernel")]
    UnknownEntry(String),

    #[error("thread group priority {0} outside {min}..={max}", min = crate::config::GROUP_PRIORITY_MIN, max = crate::config::GROUP_PRIORITY_MAX)]
    InvalidPriority(u32),

    #[error("thread group resources exhausted: {requested} units requested, {available} unclaimed")]
    GroupResourcesExhausted { requested: usize, available: usize },

    #[error("thread group `{name}` is full ({capacity} threads)")]
    GroupFull { name: String, capacity: usize },

    #[error("cannot {operation} thread group in state {state:?}")]
    InvalidGroupState {
        operation: &'static str,
        state: GroupState,
    },

    #[error("failed to spawn execution unit: {0}")]
    Spawn(String),

    /// The job descriptor belongs to the co-processor until the group is joined.
    #[error("job descriptor is owned by the co-processor")]
    JobInFlight,

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<OffloadError>,
    },
}

// lv2-style error codes reported next to each lifecycle step.
pub const STATUS_OK: i32 = 0;
pub const STATUS_EAGAIN: i32 = 0x8001_0001_u32 as i32;
pub const STATUS_EINVAL: i32 = 0x8001_0002_u32 as i32;
pub const STATUS_ENOMEM: i32 = 0x8001_0004_u32 as i32;
pub const STATUS_ESRCH: i32 = 0x8001_0005_u32 as i32;
pub const STATUS_ENOEXEC: i32 = 0x8001_0006_u32 as i32;
pub const STATUS_EBUSY: i32 = 0x8001_000A_u32 as i32;
pub const STATUS_EFAULT: i32 = 0x8001_000D_u32 as i32;
pub const STATUS_ESTAT: i32 = 0x8001_000F_u32 as i32;
pub const STATUS_EPERM: i32 = 0x8001_0009_u32 as i32;

impl OffloadError {
    /// The status code a system call would have returned for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            OffloadError::AllocationError { .. } => STATUS_ENOMEM,
            OffloadError::LayoutError { .. } | OffloadError::ValidationError { .. } => STATUS_EINVAL,
            OffloadError::InvalidEffectiveAddress { .. } => STATUS_EFAULT,
            OffloadError::AlreadyInitialized => STATUS_EBUSY,
            OffloadError::NoFreeUnits { .. } => STATUS_EAGAIN,
            OffloadError::MalformedImage { .. } => STATUS_ENOEXEC,
            OffloadError::ImageClosed => STATUS_ESRCH,
            OffloadError::UnknownEntry(_) => STATUS_ENOEXEC,
            OffloadError::InvalidPriority(_) => STATUS_EINVAL,
            OffloadError::GroupResourcesExhausted { .. } => STATUS_EAGAIN,
            OffloadError::GroupFull { .. } => STATUS_EBUSY,
            OffloadError::InvalidGroupState { .. } => STATUS_ESTAT,
            OffloadError::Spawn(_) => STATUS_EAGAIN,
            OffloadError::JobInFlight => STATUS_EPERM,
            OffloadError::Stage { source, .. } => source.status_code(),
        }
    }

    /// The orchestrator step this error was raised in, if it was wrapped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OffloadError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, with stage wrappers removed.
    pub fn root(&self) -> &OffloadError {
        match self {
            OffloadError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for offload operations.
pub type Result<T> = std::result::Result<T, OffloadError>;

/// Creates an allocation error.
pub fn allocation_error(size: usize, alignment: usize, message: impl Into<String>) -> OffloadError {
    OffloadError::AllocationError {
        requested_size: size,
        requested_alignment: alignment,
        message: message.into(),
    }
}

/// Creates a layout error.
pub fn layout_error(size: usize, alignment: usize, message: impl Into<String>) -> OffloadError {
    OffloadError::LayoutError {
        size,
        alignment,
        message: message.into(),
    }
}

/// Creates a validation error.
pub fn validation_error(message: impl Into<String>) -> OffloadError {
    OffloadError::ValidationError {
        message: message.into(),
    }
}

/// Returns a closure that tags an error with the step it happened in.
pub fn at(stage: Stage) -> impl FnOnce(OffloadError) -> OffloadError {
    move |source| OffloadError::Stage {
        stage,
        source: Box::new(source),
    }
}

/// Faults raised by the transfer engine of an execution unit.
///
/// A fault terminates the co-processor thread that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaFault {
    #[error("invalid DMA tag {tag}")]
    InvalidTag { tag: u32 },

    #[error("invalid DMA transfer size {size}")]
    InvalidSize { size: usize },

    #[error("misaligned DMA transfer: lsa={lsa:#x} ea={ea:#x} size={size}")]
    Misaligned { lsa: u32, ea: u64, size: usize },

    #[error("local store access out of range: lsa={lsa:#x} size={size}")]
    LocalStoreRange { lsa: u32, size: usize },

    /// A typed view of local store at an address not aligned for the type.
    #[error("misaligned local store view: lsa={lsa:#x} size={size} align={align}")]
    MisalignedView { lsa: u32, size: usize, align: usize },

    #[error("invalid effective address {ea:#x} for {size} bytes")]
    InvalidEffectiveAddress { ea: u64, size: usize },

    #[error("DMA engine is not running")]
    EngineStopped,
}

impl DmaFault {
    /// Status code reported through the group exit when this fault kills a thread.
    pub fn code(&self) -> i32 {
        match self {
            DmaFault::InvalidTag { .. } => 0x0001,
            DmaFault::InvalidSize { .. } => 0x0002,
            DmaFault::Misaligned { .. } => 0x0004,
            DmaFault::LocalStoreRange { .. } => 0x0008,
            DmaFault::InvalidEffectiveAddress { .. } => 0x0010,
            DmaFault::EngineStopped => 0x0020,
            DmaFault::MisalignedView { .. } => 0x0040,
        }
    }
}
