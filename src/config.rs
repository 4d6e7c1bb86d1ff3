//! Machine and offload configuration.

use crate::error::{validation_error, Result};

/// Execution units on the simulated chip.
pub const DEFAULT_PHYSICAL_UNITS: usize = 6;

/// Size of the simulated main storage.
pub const DEFAULT_MAIN_STORAGE_BYTES: usize = 64 * 1024;

pub const DEFAULT_GROUP_NAME: &str = "vecmath_group";
pub const DEFAULT_THREAD_NAME: &str = "vecmath_thread";
pub const DEFAULT_GROUP_PRIORITY: u32 = 100;

/// Highest thread-group priority (numerically smallest).
pub const GROUP_PRIORITY_MIN: u32 = 16;
/// Lowest thread-group priority.
pub const GROUP_PRIORITY_MAX: u32 = 255;

/// Shape of the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub physical_units: usize,
    pub main_storage_bytes: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            physical_units: DEFAULT_PHYSICAL_UNITS,
            main_storage_bytes: DEFAULT_MAIN_STORAGE_BYTES,
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.physical_units == 0 {
            return Err(validation_error("machine needs at least one execution unit"));
        }
        if self.main_storage_bytes == 0 {
            return Err(validation_error("main storage size must be nonzero"));
        }
        Ok(())
    }
}

/// Parameters of one offload call.
///
/// `units` and `raw_units` are reserved when the subsystem is initialized;
/// the thread group claims one unit from that reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadConfig {
    pub units: usize,
    pub raw_units: usize,
    pub group_name: String,
    pub thread_name: String,
    pub priority: u32,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        OffloadConfig {
            units: DEFAULT_PHYSICAL_UNITS,
            raw_units: 0,
            group_name: DEFAULT_GROUP_NAME.to_string(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            priority: DEFAULT_GROUP_PRIORITY,
        }
    }
}

impl OffloadConfig {
    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = name.into();
        self
    }

    /// Rejects configurations no offload could run with. Priority is checked
    /// by group creation.
    pub fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(validation_error("at least one execution unit must be reserved"));
        }
        if self.group_name.is_empty() {
            return Err(validation_error("group name must not be empty"));
        }
        if self.thread_name.is_empty() {
            return Err(validation_error("thread name must not be empty"));
        }
        Ok(())
    }
}
