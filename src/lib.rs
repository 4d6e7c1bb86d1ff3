//! Offloads a four-lane vector computation to a simulated DMA-only vector
//! co-processor.
//!
//! The control processor fills a 128-byte [`JobDescriptor`](job::JobDescriptor)
//! in main storage and starts one co-processor thread with the descriptor's
//! effective address. The kernel pulls the descriptor into its local store,
//! squares the input lanes, reduces them to a dot product with a two-step
//! butterfly, estimates the magnitude with a single reciprocal-square-root
//! estimate and pushes the descriptor back with `done` set. The control side
//! only reads the results after joining the thread group.
//!
//! ```no_run
//! use vecmath_offload::config::{MachineConfig, OffloadConfig};
//! use vecmath_offload::coproc::Machine;
//! use vecmath_offload::offload::Orchestrator;
//!
//! let machine = Machine::new(MachineConfig::default())?;
//! let completion = Orchestrator::new(machine, OffloadConfig::default()).run([1.0, 2.0, 3.0, 4.0])?;
//! let result = completion.result.expect("kernel sets done");
//! assert_eq!(result.dot_product, 30.0);
//! # Ok::<(), vecmath_offload::error::OffloadError>(())
//! ```

pub mod config;
pub mod coproc;
pub mod error;
pub mod job;
pub mod kernel;
pub mod memory;
pub mod offload;
pub mod report;
pub mod simd;
pub mod utils;

pub use error::{DmaFault, OffloadError, Result};
pub use job::{JobBuffer, JobDescriptor, VecmathResult};
pub use offload::{offload, Completion, OffloadStatus, Orchestrator, Stage};
