use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::MachineConfig;
use crate::coproc::group::ThreadArgument;
use crate::coproc::unit::UnitContext;
use crate::error::{DmaFault, Result};
use crate::kernel;
use crate::memory::MainStorage;

/// A native co-processor program: runs on its unit until it returns an exit
/// status or faults.
pub type Kernel = Arc<dyn Fn(&mut UnitContext, ThreadArgument) -> std::result::Result<i32, DmaFault> + Send + Sync>;

/// Maps image entry symbols to the native kernels they name.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, Kernel>,
}

impl KernelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the kernels shipped with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(kernel::VECMATH_ENTRY, kernel::vecmath_main);
        registry
    }

    pub fn register<F>(&mut self, symbol: impl Into<String>, kernel: F) -> &mut Self
    where
        F: Fn(&mut UnitContext, ThreadArgument) -> std::result::Result<i32, DmaFault> + Send + Sync + 'static,
    {
        self.kernels.insert(symbol.into(), Arc::new(kernel));
        self
    }

    pub fn resolve(&self, symbol: &str) -> Option<Kernel> {
        self.kernels.get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.kernels.contains_key(symbol)
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbols: Vec<&String> = self.kernels.keys().collect();
        symbols.sort();
        f.debug_struct("KernelRegistry").field("symbols", &symbols).finish()
    }
}

/// Subsystem bookkeeping, owned by the machine rather than the process.
#[derive(Debug, Default)]
pub(crate) struct Subsystem {
    pub(crate) initialized: bool,
    pub(crate) reserved: usize,
    pub(crate) raw: usize,
    pub(crate) claimed: usize,
}

/// One simulated chip: execution units, main storage and the kernels its
/// images can name.
pub struct Machine {
    config: MachineConfig,
    storage: Arc<MainStorage>,
    kernels: KernelRegistry,
    subsystem: Mutex<Subsystem>,
    threads_started: AtomicUsize,
}

impl Machine {
    /// A machine running the built-in kernels.
    pub fn new(config: MachineConfig) -> Result<Arc<Self>> {
        Self::with_kernels(config, KernelRegistry::with_builtin())
    }

    pub fn with_kernels(config: MachineConfig, kernels: KernelRegistry) -> Result<Arc<Self>> {
        config.validate()?;
        let storage = MainStorage::new(config.main_storage_bytes)?;
        Ok(Arc::new(Machine {
            config,
            storage,
            kernels,
            subsystem: Mutex::new(Subsystem::default()),
            threads_started: AtomicUsize::new(0),
        }))
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn physical_units(&self) -> usize {
        self.config.physical_units
    }

    pub fn storage(&self) -> &Arc<MainStorage> {
        &self.storage
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn is_initialized(&self) -> bool {
        self.subsystem().initialized
    }

    /// Units currently claimed by thread groups.
    pub fn units_in_use(&self) -> usize {
        self.subsystem().claimed
    }

    /// Co-processor threads started over the machine's lifetime.
    pub fn threads_started(&self) -> usize {
        self.threads_started.load(Ordering::SeqCst)
    }

    pub(crate) fn subsystem(&self) -> MutexGuard<'_, Subsystem> {
        self.subsystem.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_thread_start(&self) {
        self.threads_started.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("config", &self.config)
            .field("kernels", &self.kernels)
            .field("threads_started", &self.threads_started())
            .finish()
    }
}
