use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{GROUP_PRIORITY_MAX, GROUP_PRIORITY_MIN};
use crate::coproc::group::ThreadGroup;
use crate::coproc::image::ImageHandle;
use crate::coproc::machine::Machine;
use crate::error::{validation_error, OffloadError, Result};

/// An initialized co-processor subsystem.
///
/// Holds the reservation of execution units for as long as it lives and
/// finalizes the subsystem on drop. A machine has at most one runtime at a
/// time.
pub struct Runtime {
    machine: Arc<Machine>,
    units: usize,
    raw_units: usize,
}

impl Runtime {
    /// Initializes the subsystem, reserving `units` units for thread groups
    /// and `raw_units` units for raw threads.
    pub fn initialize(machine: &Arc<Machine>, units: usize, raw_units: usize) -> Result<Self> {
        if units == 0 {
            return Err(validation_error("at least one execution unit must be reserved"));
        }
        let mut subsystem = machine.subsystem();
        if subsystem.initialized {
            return Err(OffloadError::AlreadyInitialized);
        }
        let requested = units + raw_units;
        let available = machine.physical_units();
        if requested > available {
            return Err(OffloadError::NoFreeUnits {
                requested,
                available,
            });
        }

        subsystem.initialized = true;
        subsystem.reserved = units;
        subsystem.raw = raw_units;
        subsystem.claimed = 0;
        drop(subsystem);

        debug!(units, raw_units, "co-processor subsystem initialized");
        Ok(Runtime {
            machine: Arc::clone(machine),
            units,
            raw_units,
        })
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn raw_units(&self) -> usize {
        self.raw_units
    }

    /// Reserved units not claimed by any thread group.
    pub fn unclaimed_units(&self) -> usize {
        let subsystem = self.machine.subsystem();
        subsystem.reserved.saturating_sub(subsystem.claimed)
    }

    /// Imports an image from an in-memory blob.
    pub fn import_image(&self, bytes: &[u8]) -> Result<ImageHandle> {
        ImageHandle::import(bytes)
    }

    /// Creates a thread group that will hold `capacity` threads.
    pub fn create_group(&self, name: &str, capacity: usize, priority: u32) -> Result<ThreadGroup<'_>> {
        if name.is_empty() {
            return Err(validation_error("group name must not be empty"));
        }
        if capacity == 0 {
            return Err(validation_error("group capacity must be nonzero"));
        }
        if !(GROUP_PRIORITY_MIN..=GROUP_PRIORITY_MAX).contains(&priority) {
            return Err(OffloadError::InvalidPriority(priority));
        }

        self.claim(capacity)?;
        Ok(ThreadGroup::new(self, name.to_string(), capacity, priority))
    }

    fn claim(&self, units: usize) -> Result<()> {
        let mut subsystem = self.machine.subsystem();
        let available = subsystem.reserved.saturating_sub(subsystem.claimed);
        if units > available {
            return Err(OffloadError::GroupResourcesExhausted {
                requested: units,
                available,
            });
        }
        subsystem.claimed += units;
        Ok(())
    }

    pub(crate) fn release(&self, units: usize) {
        let mut subsystem = self.machine.subsystem();
        subsystem.claimed = subsystem.claimed.saturating_sub(units);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let mut subsystem = self.machine.subsystem();
        subsystem.initialized = false;
        subsystem.reserved = 0;
        subsystem.raw = 0;
        subsystem.claimed = 0;
        drop(subsystem);
        debug!("co-processor subsystem finalized");
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("units", &self.units)
            .field("raw_units", &self.raw_units)
            .finish()
    }
}
