//! `/dev/mem` style mappings through `mmap(2)`.

use super::memory::Mapping;
use crate::error::{Error, Result};
use core::ptr::{self, NonNull};
use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const FALLBACK_PAGE_SIZE: usize = 4096;

pub(crate) struct DevMemMapping {
    /// Page-aligned start of the mapping, as returned by mmap.
    start: NonNull<u8>,
    map_len: usize,
    /// First register of the requested block.
    regs: *mut u32,
}

// The mapping is plain device memory. Exclusive access is enforced by the
// window lock that wraps every mapping.
unsafe impl Send for DevMemMapping {}
unsafe impl Sync for DevMemMapping {}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(FALLBACK_PAGE_SIZE)
}

impl DevMemMapping {
    pub(crate) fn open(path: &Path, base: u64, len: usize, physical: bool) -> Result<Self> {
        let failed = |reason: String| Error::MapFailed { base, reason };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| failed(format!("{}: {e}", path.display())))?;

        let page = page_size();
        let (offset, lead) = if physical {
            let aligned = base & !(page as u64 - 1);
            (aligned, (base - aligned) as usize)
        } else {
            (0, 0)
        };
        let map_len = (lead + len).div_ceil(page) * page;
        let offset = libc::off_t::try_from(offset).map_err(|_| failed("offset out of range".into()))?;

        // SAFETY: a fresh shared mapping of an open device file; checked below.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(failed(std::io::Error::last_os_error().to_string()));
        }
        let start = NonNull::new(raw.cast::<u8>()).ok_or_else(|| failed("mmap returned null".into()))?;
        // SAFETY: lead is below one page and the mapping spans at least one page.
        let regs = unsafe { start.as_ptr().add(lead) }.cast::<u32>();

        log::debug!(
            "mapped {} at {base:#x} ({map_len:#x} bytes)",
            path.display()
        );
        Ok(Self { start, map_len, regs })
    }
}

impl Mapping for DevMemMapping {
    fn read(&self, word: usize) -> u32 {
        // SAFETY: the window guard keeps `word` inside the requested block.
        unsafe { ptr::read_volatile(self.regs.add(word)) }
    }

    fn write(&self, word: usize, value: u32) {
        // SAFETY: as for `read`.
        unsafe { ptr::write_volatile(self.regs.add(word), value) }
    }
}

impl Drop for DevMemMapping {
    fn drop(&mut self) {
        // SAFETY: start/map_len are exactly what mmap returned.
        let rc = unsafe { libc::munmap(self.start.as_ptr().cast(), self.map_len) };
        if rc != 0 {
            log::warn!("munmap failed: {}", std::io::Error::last_os_error());
        }
    }
}

impl fmt::Debug for DevMemMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevMemMapping")
            .field("start", &self.start)
            .field("map_len", &self.map_len)
            .finish()
    }
}
