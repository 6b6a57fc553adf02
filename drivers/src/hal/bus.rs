//! Byte-register bus abstraction used by expander chips.

use crate::error::Result;

/// A device exposing 8-bit registers, typically over I2C.
pub trait RegisterBus: Send + Sync {
    fn read_byte(&self, register: u8) -> Result<u8>;

    fn write_byte(&self, register: u8, value: u8) -> Result<()>;

    /// Read consecutive registers starting at `register` in one transfer.
    fn read_block(&self, register: u8, buf: &mut [u8]) -> Result<()>;
}
