//! Hardware I/O Subsystem
//!
//! Userspace access to single-board-computer GPIO through memory-mapped SoC
//! registers, with single ownership of every pin and bus address.
//!
//! # Module Organization
//!
//! - [`hal`]: Backend and device traits
//! - [`mmio`]: Register window mapping
//! - [`platform`]: Per-SoC register backends
//! - [`registry`]: Provisioning, ownership and shutdown
//! - [`irq`]: Edge polling, debouncing and event fan-out
//! - [`peripheral`]: Drivers for bus-attached chips
//!
//! # Usage Example
//!
//! ```no_run
//! use sbcio_drivers::hal::gpio::DigitalPin;
//! use sbcio_drivers::{Config, DeviceRegistry, InputConfig, PinTable, Soc, Trigger};
//!
//! let registry = DeviceRegistry::new(Soc::Bcm2711, PinTable::digital(0..28), Config::from_env()?)?;
//! let button = registry.provision_input(
//!     17,
//!     InputConfig::new().with_trigger(Trigger::Both).with_debounce(std::time::Duration::from_millis(20)),
//! )?;
//! for event in button.subscribe()? {
//!     println!("{} -> {}", event.key, event.value);
//! }
//! # Ok::<(), sbcio_drivers::Error>(())
//! ```

pub mod config;
pub mod device_manager;
pub mod error;
pub mod gpio;
pub mod hal;
pub mod i2c;
pub mod irq;
pub mod mmio;
pub mod peripheral;
pub mod platform;
pub mod registry;

// Re-export commonly used types
pub use common::{DeviceMode, ModeSet, PinDescriptor, PinTable, PullUpDown, ResourceKey, Trigger};
pub use config::{Config, MemorySource};
pub use error::{Error, Result};
pub use gpio::GpioDevice;
pub use hal::gpio::{DigitalPin, GpioBackend, PinLevel};
pub use hal::interrupt::PinEvent;
pub use i2c::I2cDevice;
pub use platform::Soc;
pub use registry::{DependentFactory, DeviceRegistry, FactoryId, InputConfig};
