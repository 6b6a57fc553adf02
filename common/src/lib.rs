//! Board description types shared by every layer of the I/O stack.
//!
//! Nothing in here touches hardware. The types describe which logical pins a
//! board exposes, which operating modes each one supports, and how a
//! provisionable resource is identified.
//!
//! # Module Organization
//!
//! - [`mode`]: Operating modes, pull resistors and edge triggers
//! - [`pin`]: Immutable per-pin metadata
//! - [`table`]: The board's pin capability table
//! - [`key`]: Canonical resource identity used for single ownership
//! - [`bits`]: Register bit-field helpers

pub mod bits;
pub mod key;
pub mod mode;
pub mod pin;
pub mod table;

pub use key::{ResourceKey, ResourceKind};
pub use mode::{DeviceMode, ModeSet, PullUpDown, Trigger};
pub use pin::PinDescriptor;
pub use table::{PinNotFound, PinTable, PinTableBuilder};
