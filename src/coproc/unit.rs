use std::sync::Arc;

use bytemuck::Pod;

use crate::coproc::local_store::LocalStore;
use crate::coproc::mfc::Mfc;
use crate::error::DmaFault;
use crate::memory::EffectiveAddress;

/// What a kernel sees of its execution unit: the local store and the
/// transfer engine. Main storage is only reachable through the engine.
pub struct UnitContext {
    unit: usize,
    local: Arc<LocalStore>,
    mfc: Mfc,
}

impl UnitContext {
    pub(crate) fn new(unit: usize, local: Arc<LocalStore>, mfc: Mfc) -> Self {
        UnitContext { unit, local, mfc }
    }

    pub fn unit(&self) -> usize {
        self.unit
    }

    pub fn local_store(&self) -> &LocalStore {
        &self.local
    }

    pub fn mfc(&self) -> &Mfc {
        &self.mfc
    }

    pub fn read_local<T: Pod>(&self, lsa: u32) -> Result<T, DmaFault> {
        self.local.read_pod(lsa)
    }

    pub fn write_local<T: Pod>(&self, lsa: u32, value: &T) -> Result<(), DmaFault> {
        self.local.write_pod(lsa, value)
    }

    /// Runs `f` on a typed view of local store at `lsa`, in place.
    pub fn with_local_mut<T: Pod, R>(&self, lsa: u32, f: impl FnOnce(&mut T) -> R) -> Result<R, DmaFault> {
        self.local.with_mut(lsa, f)
    }

    pub fn get(&self, lsa: u32, ea: EffectiveAddress, size: usize, tag: u32) -> Result<(), DmaFault> {
        self.mfc.get(lsa, ea, size, tag)
    }

    pub fn put(&self, lsa: u32, ea: EffectiveAddress, size: usize, tag: u32) -> Result<(), DmaFault> {
        self.mfc.put(lsa, ea, size, tag)
    }

    pub fn wait(&self, tag: u32) -> Result<(), DmaFault> {
        self.mfc.wait(tag)
    }
}

impl std::fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitContext").field("unit", &self.unit).finish()
    }
}
