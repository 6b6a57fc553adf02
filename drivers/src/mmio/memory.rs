use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A live mapping of consecutive 32-bit registers.
///
/// Word offsets are validated by [`super::WindowGuard`] before they get here.
pub(crate) trait Mapping: fmt::Debug + Send + Sync {
    fn read(&self, word: usize) -> u32;
    fn write(&self, word: usize, value: u32);
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Map `len` bytes at physical address `base` through a memory device.
        ///
        /// With `physical` unset the device ignores the offset and always maps
        /// its own block from zero, which is how `/dev/gpiomem` behaves.
        pub(crate) fn open_device(
            path: &Path,
            base: u64,
            len: usize,
            physical: bool,
        ) -> Result<Box<dyn Mapping>> {
            let mapping = super::devmem::DevMemMapping::open(path, base, len, physical)?;
            Ok(Box::new(mapping))
        }
    } else {
        pub(crate) fn open_device(
            path: &Path,
            base: u64,
            _len: usize,
            _physical: bool,
        ) -> Result<Box<dyn Mapping>> {
            Err(Error::MapFailed {
                base,
                reason: format!("{} is not available on this host", path.display()),
            })
        }
    }
}

/// Heap-backed stand-in for a physical address space.
///
/// Every word reads as zero until written. Mappings are tracked so tests can
/// check that nothing is mapped twice or unmapped twice.
#[derive(Debug, Default)]
pub struct SimulatedMemory {
    words: spin::Mutex<BTreeMap<u64, u32>>,
    refused: spin::Mutex<Vec<u64>>,
    live: AtomicUsize,
    mapped: AtomicUsize,
    unmapped: AtomicUsize,
}

impl SimulatedMemory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Read the word at a physical address.
    pub fn peek(&self, address: u64) -> u32 {
        self.words.lock().get(&address).copied().unwrap_or(0)
    }

    /// Write the word at a physical address, like an external agent would.
    pub fn poke(&self, address: u64, value: u32) {
        self.words.lock().insert(address, value);
    }

    /// Make every later attempt to map a window starting at `base` fail.
    pub fn refuse(&self, base: u64) {
        self.refused.lock().push(base);
    }

    pub fn allow(&self, base: u64) {
        self.refused.lock().retain(|b| *b != base);
    }

    /// Mappings currently alive.
    pub fn live_mappings(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total mappings ever created.
    pub fn map_count(&self) -> usize {
        self.mapped.load(Ordering::Acquire)
    }

    pub fn unmap_count(&self) -> usize {
        self.unmapped.load(Ordering::Acquire)
    }

    pub(crate) fn map(self: &Arc<Self>, base: u64, len: usize) -> Result<Box<dyn Mapping>> {
        if self.refused.lock().contains(&base) {
            return Err(Error::MapFailed {
                base,
                reason: "permission denied".into(),
            });
        }
        self.live.fetch_add(1, Ordering::AcqRel);
        self.mapped.fetch_add(1, Ordering::AcqRel);
        log::trace!("simulated map {base:#x}+{len:#x}");
        Ok(Box::new(SimulatedMapping {
            memory: Arc::clone(self),
            base,
        }))
    }
}

#[derive(Debug)]
struct SimulatedMapping {
    memory: Arc<SimulatedMemory>,
    base: u64,
}

impl SimulatedMapping {
    fn address(&self, word: usize) -> u64 {
        self.base + (word as u64) * 4
    }
}

impl Mapping for SimulatedMapping {
    fn read(&self, word: usize) -> u32 {
        self.memory.peek(self.address(word))
    }

    fn write(&self, word: usize, value: u32) {
        self.memory.poke(self.address(word), value);
    }
}

impl Drop for SimulatedMapping {
    fn drop(&mut self) {
        self.memory.live.fetch_sub(1, Ordering::AcqRel);
        self.memory.unmapped.fetch_add(1, Ordering::AcqRel);
    }
}
