//! Hardware Abstraction Layer (HAL) - Platform-Independent Traits
//!
//! These traits are the only seams between the registry and the hardware.
//! Register backends implement [`gpio::GpioBackend`], bus transports
//! implement [`bus::RegisterBus`], and every provisioned pin, native or
//! behind an expander, is usable as a [`gpio::DigitalPin`].
//!
//! # Available Interfaces
//!
//! - [`gpio`]: Register backends and provisioned pin handles
//! - [`bus`]: Byte-register buses used by expander chips
//! - [`interrupt`]: Edge events and interrupt demultiplexing

pub mod bus;
pub mod gpio;
pub mod interrupt;
