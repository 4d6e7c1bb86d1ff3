//! The control-processor side of one offload.
//!
//! [`Orchestrator::run`] walks the lifecycle in a fixed order:
//!
//! | Step | Operation                                   | Failure          |
//! |------|---------------------------------------------|------------------|
//! | 1    | allocate the job descriptor                 | fatal            |
//! | 2    | initialize the subsystem                    | fatal            |
//! | 3    | import the kernel image                     | fatal            |
//! | 4    | create the thread group                     | fatal            |
//! | 5    | create the thread, `arg0` = descriptor      | fatal            |
//! | 6    | start the group                             | fatal            |
//! | 7    | join the group                              | fatal            |
//! | 8    | read the results back                       | `done == 0` soft |
//! | 9    | destroy the group, close the image          | logged only      |
//!
//! Fatal failures come back as [`OffloadError::Stage`]. A run that joined
//! but never set `done` returns a [`Completion`] without a result.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::OffloadConfig;
use crate::coproc::{GroupExit, Machine, Runtime, ThreadArgument, ThreadAttribute};
use crate::error::{at, OffloadError, Result, STATUS_OK};
use crate::job::{JobBuffer, VecmathResult};
use crate::kernel;

pub use crate::error::Stage;

/// Logs the outcome of one lifecycle step and tags failures with it.
fn step<T>(stage: Stage, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => info!(%stage, status = STATUS_OK, "offload step succeeded"),
        Err(e) => warn!(
            %stage,
            status = format_args!("{:#010x}", e.status_code()),
            error = %e,
            "offload step failed"
        ),
    }
    result.map_err(at(stage))
}

/// A joined offload.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub exit: GroupExit,
    /// `None` when the co-processor never marked the job done.
    pub result: Option<VecmathResult>,
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }
}

/// What the display side gets to see of an offload.
#[derive(Debug, Clone, PartialEq)]
pub enum OffloadStatus {
    Available(VecmathResult),
    Unavailable(String),
}

impl OffloadStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, OffloadStatus::Available(_))
    }

    pub fn result(&self) -> Option<&VecmathResult> {
        match self {
            OffloadStatus::Available(result) => Some(result),
            OffloadStatus::Unavailable(_) => None,
        }
    }
}

impl From<Result<Completion>> for OffloadStatus {
    fn from(outcome: Result<Completion>) -> Self {
        match outcome {
            Ok(Completion {
                result: Some(result),
                ..
            }) => OffloadStatus::Available(result),
            Ok(Completion { exit, result: None }) => OffloadStatus::Unavailable(format!(
                "co-processor did not complete the job ({}, status {:#x})",
                exit.cause, exit.status
            )),
            Err(e) => OffloadStatus::Unavailable(e.to_string()),
        }
    }
}

/// Runs vecmath jobs on a machine.
pub struct Orchestrator {
    machine: Arc<Machine>,
    config: OffloadConfig,
    image: Cow<'static, [u8]>,
}

impl Orchestrator {
    /// An orchestrator loading the embedded kernel image.
    pub fn new(machine: Arc<Machine>, config: OffloadConfig) -> Self {
        Orchestrator {
            machine,
            config,
            image: Cow::Borrowed(kernel::embedded_image()),
        }
    }

    /// Loads `image` instead of the embedded kernel image.
    pub fn with_image(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.image = Cow::Owned(image.into());
        self
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Offloads one input vector and waits for the co-processor.
    pub fn run(&self, input: [f32; 4]) -> Result<Completion> {
        step(Stage::Initialize, self.config.validate())?;

        let mut job = step(Stage::Allocate, JobBuffer::allocate(self.machine.storage(), input))?;
        info!(ea = %job.effective_address(), ?input, "job descriptor prepared");

        let runtime = step(
            Stage::Initialize,
            Runtime::initialize(&self.machine, self.config.units, self.config.raw_units),
        )?;
        let mut image = step(Stage::ImageImport, runtime.import_image(&self.image))?;
        let mut group = step(
            Stage::GroupCreate,
            runtime.create_group(&self.config.group_name, 1, self.config.priority),
        )?;
        step(
            Stage::ThreadCreate,
            group.create_thread(
                &image,
                ThreadArgument::with_address(job.effective_address()),
                &ThreadAttribute::named(self.config.thread_name.as_str()),
            ),
        )?;

        // from here until the join returns the descriptor belongs to the
        // co-processor
        step(Stage::Start, job.hand_off())?;
        let joined = step(Stage::Start, group.start()).and_then(|()| step(Stage::Join, group.join()));
        let exit = match joined {
            Ok(exit) => exit,
            Err(e) => {
                // dropping the group joins whatever was started
                drop(group);
                job.reclaim();
                return Err(e);
            }
        };
        job.reclaim();

        if !exit.is_normal() {
            warn!(cause = %exit.cause, status = exit.status, "co-processor thread group terminated abnormally");
        }

        let result = step(Stage::Readback, job.result())?;
        if result.is_none() {
            warn!("co-processor finished without marking the job done");
        }

        if let Err(e) = group.destroy() {
            warn!(error = %e, "failed to destroy thread group");
        }
        if let Err(e) = image.close() {
            warn!(error = %e, "failed to close co-processor image");
        }

        Ok(Completion { exit, result })
    }

    /// Runs an offload and reduces the outcome to what a display needs.
    pub fn status(&self, input: [f32; 4]) -> OffloadStatus {
        OffloadStatus::from(self.run(input))
    }
}

/// Offloads `input` on `machine` with `config`.
pub fn offload(machine: &Arc<Machine>, config: OffloadConfig, input: [f32; 4]) -> OffloadStatus {
    Orchestrator::new(Arc::clone(machine), config).status(input)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("image_size", &self.image.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;

    #[test]
    fn test_status_from_outcomes() {
        let err: Result<Completion> = Err(at(Stage::GroupCreate)(OffloadError::InvalidPriority(1)));
        let status = OffloadStatus::from(err);
        assert!(!status.is_available());
        assert!(status.result().is_none());
        match status {
            OffloadStatus::Unavailable(reason) => assert!(reason.contains("thread group creation")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_fails_before_allocation() {
        let machine = Machine::new(MachineConfig::default()).unwrap();
        let config = OffloadConfig::default().with_units(0);
        let err = Orchestrator::new(Arc::clone(&machine), config).run([1.0; 4]).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Initialize));
        assert_eq!(machine.storage().allocated_bytes(), 0);
    }
}
