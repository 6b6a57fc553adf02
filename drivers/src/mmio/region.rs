use super::memory::{Mapping, open_device};
use crate::config::MemorySource;
use crate::error::{Error, Result};
use common::bits;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Slot = spin::Mutex<Option<Box<dyn Mapping>>>;

#[derive(Debug)]
struct WindowInner {
    base: u64,
    words: usize,
    /// `None` once unmapped. The mutex is the window's RMW lock.
    mapping: Slot,
    refs: AtomicUsize,
}

impl WindowInner {
    fn covers(&self, base: u64, len: usize) -> bool {
        let end = self.base + (self.words as u64) * 4;
        base >= self.base && base + len as u64 <= end
    }
}

/// One reference to a mapped register block.
///
/// Each handle returned by [`RegionManager::map`] holds exactly one reference
/// and gives it back through [`RegionManager::unmap`].
#[derive(Debug)]
pub struct RegisterWindow {
    inner: Arc<WindowInner>,
    first_word: usize,
    words: usize,
    released: AtomicBool,
}

impl RegisterWindow {
    /// Physical address of word zero of this handle.
    pub fn base(&self) -> u64 {
        self.inner.base + (self.first_word as u64) * 4
    }

    pub fn words(&self) -> usize {
        self.words
    }

    pub fn is_mapped(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.inner.mapping.lock().is_some()
    }

    /// Take the window lock.
    ///
    /// Every read-modify-write of a register has to happen under one guard.
    /// The mapping is re-validated on each call, so a handle that outlived
    /// its manager gets `Fatal` instead of touching unmapped memory.
    pub fn lock(&self) -> Result<WindowGuard<'_>> {
        let mapping = self.inner.mapping.lock();
        if mapping.is_none() || self.released.load(Ordering::Acquire) {
            log::error!("register window {:#x} used after unmap", self.base());
            return Err(Error::Fatal(format!(
                "register window {:#x} is no longer mapped",
                self.base()
            )));
        }
        Ok(WindowGuard {
            window: self,
            mapping,
        })
    }
}

/// Exclusive, bounds-checked access to one register window.
pub struct WindowGuard<'a> {
    window: &'a RegisterWindow,
    mapping: spin::MutexGuard<'a, Option<Box<dyn Mapping>>>,
}

impl WindowGuard<'_> {
    fn access(&self, word: usize) -> Result<(&dyn Mapping, usize)> {
        if word >= self.window.words {
            log::error!(
                "register offset {word:#x} outside window {:#x} ({} words)",
                self.window.base(),
                self.window.words
            );
            return Err(Error::Fatal(format!(
                "register offset {word:#x} outside window {:#x}",
                self.window.base()
            )));
        }
        let mapping = self
            .mapping
            .as_deref()
            .ok_or_else(|| Error::Fatal(format!("register window {:#x} is no longer mapped", self.window.base())))?;
        Ok((mapping, self.window.first_word + word))
    }

    pub fn read(&self, word: usize) -> Result<u32> {
        let (mapping, index) = self.access(word)?;
        let value = mapping.read(index);
        log::trace!("read {:#x}[{word:#x}] = {value:#010x}", self.window.base());
        Ok(value)
    }

    pub fn write(&mut self, word: usize, value: u32) -> Result<()> {
        let (mapping, index) = self.access(word)?;
        log::trace!("write {:#x}[{word:#x}] = {value:#010x}", self.window.base());
        mapping.write(index, value);
        Ok(())
    }

    /// Read, transform and write back one word. Returns the written value.
    pub fn modify(&mut self, word: usize, f: impl FnOnce(u32) -> u32) -> Result<u32> {
        let value = f(self.read(word)?);
        self.write(word, value)?;
        Ok(value)
    }

    pub fn field(&self, word: usize, shift: u32, width: u32) -> Result<u32> {
        Ok(bits::field(self.read(word)?, shift, width))
    }

    pub fn set_field(&mut self, word: usize, shift: u32, width: u32, value: u32) -> Result<()> {
        self.modify(word, |w| bits::with_field(w, shift, width, value))
            .map(drop)
    }

    pub fn test_bit(&self, word: usize, bit: u32) -> Result<bool> {
        Ok(self.field(word, bit, 1)? != 0)
    }
}

/// Owner of every register mapping made for one memory device.
///
/// Mapping a range that an existing window already covers hands out another
/// reference to that window instead of mapping again.
#[derive(Debug)]
pub struct RegionManager {
    source: MemorySource,
    windows: spin::Mutex<Vec<Arc<WindowInner>>>,
    closed: AtomicBool,
}

impl RegionManager {
    pub fn new(source: MemorySource) -> Self {
        Self {
            source,
            windows: spin::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> &MemorySource {
        &self.source
    }

    /// Map `len` bytes of registers at physical address `base`.
    pub fn map(&self, base: u64, len: usize) -> Result<RegisterWindow> {
        if base % 4 != 0 || len == 0 || len % 4 != 0 {
            return Err(Error::Fatal(format!(
                "unaligned register window {base:#x}+{len:#x}"
            )));
        }

        let mut windows = self.windows.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::MapFailed {
                base,
                reason: "region manager is closed".into(),
            });
        }

        if let Some(inner) = windows.iter().find(|w| w.covers(base, len)) {
            inner.refs.fetch_add(1, Ordering::AcqRel);
            log::trace!("reusing window {:#x} for {base:#x}+{len:#x}", inner.base);
            return Ok(RegisterWindow {
                inner: Arc::clone(inner),
                first_word: ((base - inner.base) / 4) as usize,
                words: len / 4,
                released: AtomicBool::new(false),
            });
        }

        let mapping = match &self.source {
            MemorySource::DevMem(path) => open_device(path, base, len, true)?,
            MemorySource::GpioMem(path) => open_device(path, base, len, false)?,
            MemorySource::Simulated(memory) => memory.map(base, len)?,
        };
        let inner = Arc::new(WindowInner {
            base,
            words: len / 4,
            mapping: spin::Mutex::new(Some(mapping)),
            refs: AtomicUsize::new(1),
        });
        windows.push(Arc::clone(&inner));
        log::debug!("mapped register window {base:#x}+{len:#x}");

        Ok(RegisterWindow {
            inner,
            first_word: 0,
            words: len / 4,
            released: AtomicBool::new(false),
        })
    }

    /// Give back one reference. The OS mapping goes away with the last one.
    pub fn unmap(&self, window: &RegisterWindow) {
        if window.released.swap(true, Ordering::AcqRel) {
            log::warn!("register window {:#x} released twice", window.base());
            return;
        }

        let mut windows = self.windows.lock();
        if window.inner.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        windows.retain(|w| !Arc::ptr_eq(w, &window.inner));
        if window.inner.mapping.lock().take().is_some() {
            log::debug!("unmapped register window {:#x}", window.inner.base);
        }
    }

    /// Force-unmap every outstanding window. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let windows = core::mem::take(&mut *self.windows.lock());
        let count = windows.len();
        for window in windows {
            window.mapping.lock().take();
        }
        log::info!("region manager closed, {count} window(s) unmapped");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of distinct live mappings.
    pub fn window_count(&self) -> usize {
        self.windows.lock().len()
    }
}

impl Drop for RegionManager {
    fn drop(&mut self) {
        self.close();
    }
}
