//! The transfer engine of one execution unit.
//!
//! Commands are validated when they are issued and then executed in FIFO
//! order by a dedicated engine thread. Every tag has an outstanding-command
//! counter guarded by a mutex; the engine decrements it after each copy and
//! wakes waiters through a condition variable, so [`Mfc::wait`] blocks
//! without polling.
//!
//! | Size            | Alignment rule                                  |
//! |-----------------|--------------------------------------------------|
//! | 1, 2, 4, 8      | natural alignment, equal low four address bits   |
//! | 16 × n ≤ 16 KiB | local and effective address both 16-byte aligned |

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{trace, warn};

use crate::coproc::local_store::LocalStore;
use crate::error::{DmaFault, OffloadError, Result};
use crate::memory::{EffectiveAddress, MainStorage};

/// Number of tag groups.
pub const TAG_COUNT: u32 = 32;

/// Largest single transfer.
pub const MAX_TRANSFER_SIZE: usize = 16 * 1024;

/// Alignment required of transfers of 16 bytes or more.
pub const TRANSFER_ALIGNMENT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Main storage to local store.
    Get,
    /// Local store to main storage.
    Put,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Get => f.write_str("get"),
            Direction::Put => f.write_str("put"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Command {
    direction: Direction,
    lsa: u32,
    ea: EffectiveAddress,
    size: usize,
    tag: u32,
}

struct TagTable {
    outstanding: [u32; TAG_COUNT as usize],
    // first fault seen on each tag since its last wait
    faults: [Option<DmaFault>; TAG_COUNT as usize],
}

struct Shared {
    tags: Mutex<TagTable>,
    completed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TagTable> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Checks a transfer against the size, alignment and tag rules.
pub fn validate(lsa: u32, ea: EffectiveAddress, size: usize, tag: u32) -> std::result::Result<(), DmaFault> {
    if tag >= TAG_COUNT {
        return Err(DmaFault::InvalidTag { tag });
    }
    let misaligned = DmaFault::Misaligned { lsa, ea: ea.get(), size };
    match size {
        1 | 2 | 4 | 8 => {
            let natural = size as u64;
            if lsa as u64 % natural != 0 || ea.get() % natural != 0 {
                return Err(misaligned);
            }
            if (lsa as u64 & 0xF) != (ea.get() & 0xF) {
                return Err(misaligned);
            }
        }
        n if n > 0 && n <= MAX_TRANSFER_SIZE && n % TRANSFER_ALIGNMENT == 0 => {
            let align = TRANSFER_ALIGNMENT as u64;
            if lsa as u64 % align != 0 || ea.get() % align != 0 {
                return Err(misaligned);
            }
        }
        _ => return Err(DmaFault::InvalidSize { size }),
    }
    Ok(())
}

fn execute(
    command: &Command,
    local: &LocalStore,
    storage: &MainStorage,
) -> std::result::Result<(), DmaFault> {
    let unmapped = |_| DmaFault::InvalidEffectiveAddress {
        ea: command.ea.get(),
        size: command.size,
    };
    let mut staging = vec![0u8; command.size];
    match command.direction {
        Direction::Get => {
            storage.read(command.ea, &mut staging).map_err(unmapped)?;
            local.write(command.lsa, &staging)
        }
        Direction::Put => {
            local.read(command.lsa, &mut staging)?;
            storage.write(command.ea, &staging).map_err(unmapped)
        }
    }
}

fn run_engine(unit: usize, commands: Receiver<Command>, shared: Arc<Shared>, local: Arc<LocalStore>, storage: Arc<MainStorage>) {
    for command in commands.iter() {
        let outcome = execute(&command, &local, &storage);
        trace!(
            unit,
            direction = %command.direction,
            lsa = command.lsa,
            ea = %command.ea,
            size = command.size,
            tag = command.tag,
            ok = outcome.is_ok(),
            "dma command completed"
        );

        let tag = command.tag as usize;
        let mut tags = shared.lock();
        if let Err(fault) = outcome {
            warn!(unit, tag = command.tag, %fault, "dma fault");
            tags.faults[tag].get_or_insert(fault);
        }
        tags.outstanding[tag] -= 1;
        if tags.outstanding[tag] == 0 {
            shared.completed.notify_all();
        }
    }
}

/// Memory flow controller: asynchronous transfers between one unit's local
/// store and main storage, plus the tagged completion wait.
pub struct Mfc {
    unit: usize,
    commands: Option<Sender<Command>>,
    shared: Arc<Shared>,
    engine: Option<JoinHandle<()>>,
}

impl Mfc {
    /// Starts the engine thread for `unit`.
    pub fn spawn(unit: usize, local: Arc<LocalStore>, storage: Arc<MainStorage>) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            tags: Mutex::new(TagTable {
                outstanding: [0; TAG_COUNT as usize],
                faults: std::array::from_fn(|_| None),
            }),
            completed: Condvar::new(),
        });

        let engine_shared = Arc::clone(&shared);
        let engine = thread::Builder::new()
            .name(format!("mfc-{unit}"))
            .spawn(move || run_engine(unit, receiver, engine_shared, local, storage))
            .map_err(|e| OffloadError::Spawn(e.to_string()))?;

        Ok(Mfc {
            unit,
            commands: Some(sender),
            shared,
            engine: Some(engine),
        })
    }

    /// Issues a transfer on `tag` and returns without waiting for it.
    pub fn transfer(
        &self,
        direction: Direction,
        lsa: u32,
        ea: EffectiveAddress,
        size: usize,
        tag: u32,
    ) -> std::result::Result<(), DmaFault> {
        validate(lsa, ea, size, tag)?;
        let sender = self.commands.as_ref().ok_or(DmaFault::EngineStopped)?;

        self.shared.lock().outstanding[tag as usize] += 1;
        let command = Command {
            direction,
            lsa,
            ea,
            size,
            tag,
        };
        if sender.send(command).is_err() {
            self.shared.lock().outstanding[tag as usize] -= 1;
            return Err(DmaFault::EngineStopped);
        }
        trace!(unit = self.unit, %direction, lsa, %ea, size, tag, "dma command issued");
        Ok(())
    }

    pub fn get(&self, lsa: u32, ea: EffectiveAddress, size: usize, tag: u32) -> std::result::Result<(), DmaFault> {
        self.transfer(Direction::Get, lsa, ea, size, tag)
    }

    pub fn put(&self, lsa: u32, ea: EffectiveAddress, size: usize, tag: u32) -> std::result::Result<(), DmaFault> {
        self.transfer(Direction::Put, lsa, ea, size, tag)
    }

    /// Blocks until every transfer issued on `tag` has completed.
    ///
    /// Returns the first fault raised on the tag since the previous wait.
    pub fn wait(&self, tag: u32) -> std::result::Result<(), DmaFault> {
        if tag >= TAG_COUNT {
            return Err(DmaFault::InvalidTag { tag });
        }
        let slot = tag as usize;
        let guard = self.shared.lock();
        let mut tags = self
            .shared
            .completed
            .wait_while(guard, |tags| tags.outstanding[slot] > 0)
            .unwrap_or_else(PoisonError::into_inner);
        match tags.faults[slot].take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Transfers issued on `tag` that have not completed yet.
    pub fn outstanding(&self, tag: u32) -> u32 {
        if tag >= TAG_COUNT {
            return 0;
        }
        self.shared.lock().outstanding[tag as usize]
    }
}

impl Drop for Mfc {
    fn drop(&mut self) {
        // closing the channel lets the engine drain and exit
        self.commands.take();
        if let Some(engine) = self.engine.take() {
            if engine.join().is_err() {
                warn!(unit = self.unit, "dma engine thread panicked");
            }
        }
    }
}

impl fmt::Debug for Mfc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mfc").field("unit", &self.unit).finish()
    }
}
