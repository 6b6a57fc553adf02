//! GPIO (General Purpose Input/Output) Hardware Abstraction Layer.

use crate::error::Result;
use crate::hal::interrupt::PinEvent;
use common::{DeviceMode, PullUpDown, ResourceKey};
use std::sync::mpsc::Receiver;

/// Pin logic level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinLevel {
    /// Logic low (0V or ground).
    Low,
    /// Logic high (VDD).
    High,
}

impl From<bool> for PinLevel {
    fn from(value: bool) -> Self {
        if value {
            PinLevel::High
        } else {
            PinLevel::Low
        }
    }
}

impl From<PinLevel> for bool {
    fn from(level: PinLevel) -> bool {
        matches!(level, PinLevel::High)
    }
}

/// Register-level GPIO engine for one SoC family.
///
/// All register layout knowledge stays behind this trait. Every method works
/// on the logical GPIO number and may be called from any thread; backends
/// serialise their own read-modify-write sequences.
pub trait GpioBackend: std::fmt::Debug + Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Decode the pin's current function.
    fn mode(&self, gpio: u32) -> Result<DeviceMode>;

    /// Switch the pin's function, touching only this pin's bits.
    ///
    /// Alternate functions the pin cannot be routed to fail with
    /// `UnsupportedMode`.
    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()>;

    fn pull(&self, gpio: u32) -> Result<PullUpDown>;

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()>;

    fn read(&self, gpio: u32) -> Result<bool>;

    fn write(&self, gpio: u32, value: bool) -> Result<()>;

    /// Hand every register window back to the region manager.
    fn release(&self);
}

/// A provisioned digital pin.
///
/// Handles are closed exactly once, either explicitly or when dropped.
pub trait DigitalPin: Send + Sync {
    fn key(&self) -> &ResourceKey;

    fn mode(&self) -> Result<DeviceMode>;

    fn set_mode(&self, mode: DeviceMode) -> Result<()>;

    fn pull(&self) -> Result<PullUpDown>;

    fn set_pull(&self, pull: PullUpDown) -> Result<()>;

    fn read(&self) -> Result<bool>;

    fn write(&self, value: bool) -> Result<()>;

    /// Register a listener for debounced edge events on this pin.
    fn subscribe(&self) -> Result<Receiver<PinEvent>>;

    fn is_open(&self) -> bool;

    /// Release the pin. Closing twice logs a warning and does nothing else.
    fn close(&self);

    fn level(&self) -> Result<PinLevel> {
        self.read().map(PinLevel::from)
    }

    fn set_level(&self, level: PinLevel) -> Result<()> {
        self.write(level.into())
    }

    /// Toggle the output state of a pin.
    fn toggle(&self) -> Result<()> {
        let value = self.read()?;
        self.write(!value)
    }
}
