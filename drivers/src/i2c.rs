//! I2C devices over the Linux i2c-dev interface.

use crate::device_manager::RecordId;
use crate::error::{Error, Result};
use crate::hal::bus::RegisterBus;
use crate::registry::Shared;
use common::ResourceKey;
use core::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use std::fs::OpenOptions;
        use std::os::unix::io::AsRawFd;

        /// `ioctl` request selecting the target address for plain read/write.
        const I2C_SLAVE: libc::c_ulong = 0x0703;

        pub(crate) fn open_bus(dir: &Path, controller: u32, address: u16) -> Result<File> {
            let path = dir.join(format!("i2c-{controller}"));
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            // SAFETY: valid descriptor, I2C_SLAVE takes the address by value.
            let rc = unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(address)) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                return Err(Error::BackendError(format!(
                    "failed to select address {address:#04x} on {}: {err}",
                    path.display()
                )));
            }
            Ok(file)
        }
    } else {
        pub(crate) fn open_bus(_dir: &Path, controller: u32, address: u16) -> Result<File> {
            Err(Error::BackendError(format!(
                "I2C device {controller}:{address:#04x} unsupported on this platform"
            )))
        }
    }
}

/// An I2C slave claimed through the registry.
pub struct I2cDevice {
    shared: Arc<Shared>,
    key: ResourceKey,
    id: RecordId,
    live: Arc<AtomicBool>,
    file: Arc<Mutex<Option<File>>>,
}

impl I2cDevice {
    pub(crate) fn new(
        shared: Arc<Shared>,
        key: ResourceKey,
        id: RecordId,
        live: Arc<AtomicBool>,
        file: Arc<Mutex<Option<File>>>,
    ) -> Self {
        Self {
            shared,
            key,
            id,
            live,
            file,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn is_open(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            log::warn!("{} is already closed", self.key);
            return;
        }
        self.shared.close(&self.key, self.id);
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> std::io::Result<T>) -> Result<T> {
        let mut guard: MutexGuard<'_, Option<File>> =
            self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = guard
            .as_mut()
            .ok_or_else(|| Error::NotFound(format!("{} is closed", self.key)))?;
        Ok(f(file)?)
    }
}

impl RegisterBus for I2cDevice {
    fn read_byte(&self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_block(register, &mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&self, register: u8, value: u8) -> Result<()> {
        self.with_file(|file| file.write_all(&[register, value]))
    }

    fn read_block(&self, register: u8, buf: &mut [u8]) -> Result<()> {
        self.with_file(|file| {
            file.write_all(&[register])?;
            file.read_exact(buf)
        })
    }
}

impl fmt::Debug for I2cDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cDevice")
            .field("key", &self.key)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for I2cDevice {
    fn drop(&mut self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.shared.close(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::mmio::SimulatedMemory;
    use crate::{Config, DeviceRegistry, Error, Soc};
    use common::{PinTable, ResourceKey};

    #[test]
    fn missing_bus_releases_key() {
        let dir = std::env::temp_dir().join("sbcio-no-i2c-here");
        let config = Config::simulated(SimulatedMemory::new()).with_i2c_dev_dir(&dir);
        let registry = DeviceRegistry::new(Soc::Rk3399, PinTable::digital(0..8), config).unwrap();

        assert!(matches!(
            registry.provision_i2c(1, 0x20),
            Err(Error::Io(_) | Error::BackendError(_))
        ));
        assert!(!registry.is_open(&ResourceKey::i2c(ResourceKey::NATIVE, 1, 0x20)));
    }
}
