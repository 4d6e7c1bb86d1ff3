//! Thread groups: the unit of scheduling on the co-processor.
//!
//! ```text
//! Initialized --(capacity threads created)--> Ready --start--> Running
//!      \                                        |                |
//!       \------------ destroy ------------------+              join
//!                                                                |
//!                           Destroyed <--destroy-- Joined <------+
//! ```
//!
//! A started group is always joined: dropping a running group blocks until
//! its threads have terminated.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::coproc::image::{Image, ImageHandle};
use crate::coproc::local_store::LocalStore;
use crate::coproc::machine::Kernel;
use crate::coproc::mfc::Mfc;
use crate::coproc::runtime::Runtime;
use crate::coproc::unit::UnitContext;
use crate::error::{DmaFault, OffloadError, Result};
use crate::memory::EffectiveAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupState {
    Initialized,
    Ready,
    Running,
    Joined,
    Destroyed,
}

/// The four 64-bit words passed to a co-processor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadArgument {
    pub arg0: u64,
    pub arg1: u64,
    pub arg2: u64,
    pub arg3: u64,
}

impl ThreadArgument {
    /// `arg0` carries `ea`; the other words are zero.
    pub fn with_address(ea: EffectiveAddress) -> Self {
        ThreadArgument {
            arg0: ea.get(),
            ..Self::default()
        }
    }

    pub fn address(&self) -> EffectiveAddress {
        EffectiveAddress(self.arg0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadAttribute {
    pub name: String,
}

impl ThreadAttribute {
    pub fn named(name: impl Into<String>) -> Self {
        ThreadAttribute { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

/// How one co-processor thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadExit {
    /// The kernel returned this status.
    Exited(i32),
    /// A transfer fault stopped the thread.
    Faulted(DmaFault),
    /// The thread stopped abnormally without a fault.
    Terminated,
}

/// Reported status of a unit that was terminated.
pub const TERMINATED_STATUS: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinCause {
    /// Every thread returned from its kernel.
    AllThreadsExited,
    /// At least one thread faulted.
    Faulted,
    /// At least one thread was terminated.
    Terminated,
}

impl fmt::Display for JoinCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinCause::AllThreadsExited => f.write_str("all threads exited"),
            JoinCause::Faulted => f.write_str("thread faulted"),
            JoinCause::Terminated => f.write_str("thread terminated"),
        }
    }
}

/// Result of joining a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupExit {
    pub cause: JoinCause,
    pub status: i32,
    pub threads: Vec<(ThreadId, ThreadExit)>,
}

impl GroupExit {
    fn from_threads(threads: Vec<(ThreadId, ThreadExit)>) -> Self {
        let terminated = threads
            .iter()
            .any(|(_, exit)| matches!(exit, ThreadExit::Terminated));
        let fault = threads.iter().find_map(|(_, exit)| match exit {
            ThreadExit::Faulted(fault) => Some(fault.code()),
            _ => None,
        });

        let (cause, status) = if terminated {
            (JoinCause::Terminated, TERMINATED_STATUS)
        } else if let Some(code) = fault {
            (JoinCause::Faulted, code)
        } else {
            let status = threads
                .iter()
                .find_map(|(_, exit)| match exit {
                    ThreadExit::Exited(status) => Some(*status),
                    _ => None,
                })
                .unwrap_or(0);
            (JoinCause::AllThreadsExited, status)
        };

        GroupExit {
            cause,
            status,
            threads,
        }
    }

    /// True when every thread returned normally.
    pub fn is_normal(&self) -> bool {
        self.cause == JoinCause::AllThreadsExited
    }
}

struct PendingThread {
    id: ThreadId,
    name: String,
    image: Arc<Image>,
    kernel: Kernel,
    argument: ThreadArgument,
}

struct RunningThread {
    id: ThreadId,
    handle: JoinHandle<ThreadExit>,
}

/// A named group of co-processor threads with a fixed capacity.
pub struct ThreadGroup<'rt> {
    runtime: &'rt Runtime,
    name: String,
    capacity: usize,
    priority: u32,
    state: GroupState,
    pending: Vec<PendingThread>,
    running: Vec<RunningThread>,
    next_id: u32,
    claimed: bool,
}

impl<'rt> ThreadGroup<'rt> {
    pub(crate) fn new(runtime: &'rt Runtime, name: String, capacity: usize, priority: u32) -> Self {
        debug!(group = %name, capacity, priority, "thread group created");
        ThreadGroup {
            runtime,
            name,
            capacity,
            priority,
            state: GroupState::Initialized,
            pending: Vec::with_capacity(capacity),
            running: Vec::with_capacity(capacity),
            next_id: 0,
            claimed: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    /// Threads created so far.
    pub fn thread_count(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    fn require(&self, operation: &'static str, expected: GroupState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(OffloadError::InvalidGroupState {
                operation,
                state: self.state,
            })
        }
    }

    /// Binds a new thread to `image`'s entry kernel.
    pub fn create_thread(
        &mut self,
        image: &ImageHandle,
        argument: ThreadArgument,
        attribute: &ThreadAttribute,
    ) -> Result<ThreadId> {
        if self.state == GroupState::Ready {
            return Err(OffloadError::GroupFull {
                name: self.name.clone(),
                capacity: self.capacity,
            });
        }
        self.require("create a thread in", GroupState::Initialized)?;

        let image = Arc::clone(image.image()?);
        let kernel = self
            .runtime
            .machine()
            .kernels()
            .resolve(image.entry_symbol())
            .ok_or_else(|| OffloadError::UnknownEntry(image.entry_symbol().to_string()))?;

        let id = ThreadId(self.next_id);
        self.next_id += 1;
        debug!(
            group = %self.name,
            thread = %attribute.name,
            id = id.0,
            arg0 = format_args!("{:#x}", argument.arg0),
            "thread created"
        );
        self.pending.push(PendingThread {
            id,
            name: attribute.name.clone(),
            image,
            kernel,
            argument,
        });
        if self.pending.len() == self.capacity {
            self.state = GroupState::Ready;
        }
        Ok(id)
    }

    /// Starts every thread and returns without waiting for them.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", GroupState::Ready)?;

        let machine = Arc::clone(self.runtime.machine());
        let storage = machine.storage();
        let pending = std::mem::take(&mut self.pending);
        self.state = GroupState::Running;

        for (unit, thread) in pending.into_iter().enumerate() {
            let local = Arc::new(LocalStore::with_image(&thread.image)?);
            let mfc = Mfc::spawn(unit, Arc::clone(&local), Arc::clone(storage))?;
            let mut context = UnitContext::new(unit, local, mfc);
            let kernel = thread.kernel;
            let argument = thread.argument;
            let id = thread.id;

            let handle = thread::Builder::new()
                .name(format!("{}:{}", self.name, thread.name))
                .spawn(move || match kernel(&mut context, argument) {
                    Ok(status) => ThreadExit::Exited(status),
                    Err(fault) => ThreadExit::Faulted(fault),
                })
                .map_err(|e| OffloadError::Spawn(e.to_string()))?;

            machine.record_thread_start();
            self.running.push(RunningThread { id, handle });
        }

        debug!(group = %self.name, threads = self.running.len(), "thread group started");
        Ok(())
    }

    /// Blocks until every thread of a running group has terminated.
    pub fn join(&mut self) -> Result<GroupExit> {
        self.require("join", GroupState::Running)?;
        let exit = self.join_running();
        debug!(group = %self.name, cause = %exit.cause, status = exit.status, "thread group joined");
        Ok(exit)
    }

    fn join_running(&mut self) -> GroupExit {
        let threads = self
            .running
            .drain(..)
            .map(|thread| {
                let exit = thread.handle.join().unwrap_or(ThreadExit::Terminated);
                if let ThreadExit::Faulted(fault) = &exit {
                    warn!(group = %self.name, id = thread.id.0, %fault, "co-processor thread faulted");
                }
                (thread.id, exit)
            })
            .collect();
        self.state = GroupState::Joined;
        GroupExit::from_threads(threads)
    }

    /// Destroys the group and returns its units to the runtime.
    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            GroupState::Running | GroupState::Destroyed => Err(OffloadError::InvalidGroupState {
                operation: "destroy",
                state: self.state,
            }),
            _ => {
                self.pending.clear();
                self.release_units();
                self.state = GroupState::Destroyed;
                debug!(group = %self.name, "thread group destroyed");
                Ok(())
            }
        }
    }

    fn release_units(&mut self) {
        if self.claimed {
            self.runtime.release(self.capacity);
            self.claimed = false;
        }
    }
}

impl Drop for ThreadGroup<'_> {
    fn drop(&mut self) {
        if self.state == GroupState::Running {
            warn!(group = %self.name, "dropping a running thread group, joining it");
            let exit = self.join_running();
            debug!(group = %self.name, cause = %exit.cause, "thread group joined on drop");
        }
        self.release_units();
    }
}

impl fmt::Debug for ThreadGroup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .finish()
    }
}
