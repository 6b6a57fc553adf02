//! Native GPIO pin handles.

use crate::device_manager::RecordId;
use crate::error::{Error, Result};
use crate::hal::gpio::{DigitalPin, GpioBackend};
use crate::hal::interrupt::{BindingId, PinEvent};
use crate::registry::Shared;
use common::{DeviceMode, PinDescriptor, PullUpDown, ResourceKey};
use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

/// A SoC pin provisioned through a [`DeviceRegistry`](crate::DeviceRegistry).
///
/// Closed by [`DigitalPin::close`] or on drop, whichever comes first.
pub struct GpioDevice {
    shared: Arc<Shared>,
    descriptor: Arc<PinDescriptor>,
    key: ResourceKey,
    id: RecordId,
    mode: spin::Mutex<DeviceMode>,
    binding: Option<BindingId>,
    /// Sampled by the level poller, so it has to stay an input.
    watched: bool,
    live: Arc<AtomicBool>,
}

impl GpioDevice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<Shared>,
        descriptor: Arc<PinDescriptor>,
        key: ResourceKey,
        id: RecordId,
        mode: DeviceMode,
        binding: Option<BindingId>,
        watched: bool,
        live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            shared,
            descriptor,
            key,
            id,
            mode: spin::Mutex::new(mode),
            binding,
            watched,
            live,
        }
    }

    pub fn gpio(&self) -> u32 {
        self.descriptor.gpio
    }

    pub fn descriptor(&self) -> &PinDescriptor {
        &self.descriptor
    }

    pub(crate) fn binding(&self) -> Option<BindingId> {
        self.binding
    }

    fn backend(&self) -> Result<&dyn GpioBackend> {
        if !self.live.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!("{} is closed", self.key)));
        }
        Ok(self.shared.engine()?.backend.as_ref())
    }

    /// Release without the double-close warning.
    pub(crate) fn close_quietly(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.shared.close(&self.key, self.id);
        }
    }
}

impl DigitalPin for GpioDevice {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn mode(&self) -> Result<DeviceMode> {
        self.backend()?.mode(self.gpio())
    }

    fn set_mode(&self, mode: DeviceMode) -> Result<()> {
        let backend = self.backend()?;
        if !self.descriptor.supports(mode) || (self.watched && mode != DeviceMode::DigitalInput) {
            return Err(Error::UnsupportedMode {
                target: self.key.to_string(),
                mode,
            });
        }
        let mut current = self.mode.lock();
        backend.set_mode(self.gpio(), mode)?;
        *current = mode;
        Ok(())
    }

    fn pull(&self) -> Result<PullUpDown> {
        self.backend()?.pull(self.gpio())
    }

    fn set_pull(&self, pull: PullUpDown) -> Result<()> {
        self.backend()?.set_pull(self.gpio(), pull)
    }

    fn read(&self) -> Result<bool> {
        self.backend()?.read(self.gpio())
    }

    fn write(&self, value: bool) -> Result<()> {
        let backend = self.backend()?;
        let mode = *self.mode.lock();
        if mode != DeviceMode::DigitalOutput {
            return Err(Error::UnsupportedMode {
                target: self.key.to_string(),
                mode,
            });
        }
        backend.write(self.gpio(), value)
    }

    fn subscribe(&self) -> Result<Receiver<PinEvent>> {
        self.backend()?;
        match self.binding {
            Some(binding) => Ok(self.shared.dispatcher().subscribe(binding)),
            None => Err(Error::UnsupportedMode {
                target: format!("events on {}", self.key),
                mode: *self.mode.lock(),
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            log::warn!("{} is already closed", self.key);
            return;
        }
        self.shared.close(&self.key, self.id);
    }
}

impl fmt::Debug for GpioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioDevice")
            .field("key", &self.key)
            .field("mode", &*self.mode.lock())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for GpioDevice {
    fn drop(&mut self) {
        self.close_quietly();
    }
}
