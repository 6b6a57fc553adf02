//! Rockchip GPIO.
//!
//! Both supported chips share the DesignWare-style bank controller (one
//! 32-pin bank per block: DR, DDR, EXT_PORTA) and keep pin functions and
//! pulls in general register files whose words carry write-enable bits in
//! their high half. Where the iomux and pull fields live differs per chip.

mod rk3288;
mod rk3399;

pub use rk3288::Rk3288Gpio;
pub use rk3399::Rk3399Gpio;

use crate::error::Result;
use crate::mmio::{RegionManager, RegisterWindow};
use crate::platform::map_windows;

const GPIO_SWPORTA_DR: usize = 0x00 / 4;
const GPIO_SWPORTA_DDR: usize = 0x04 / 4;
const GPIO_EXT_PORTA: usize = 0x50 / 4;

const BLOCK_SIZE: usize = 0x1000;

fn map_blocks(regions: &RegionManager, bases: impl IntoIterator<Item = u64>) -> Result<Vec<RegisterWindow>> {
    map_windows(regions, bases, BLOCK_SIZE)
}

/// Level of `bit` in a bank controller: the latch for outputs, the sampled
/// pad for inputs.
fn read_bank(bank: &RegisterWindow, bit: u32) -> Result<bool> {
    let regs = bank.lock()?;
    if regs.test_bit(GPIO_SWPORTA_DDR, bit)? {
        regs.test_bit(GPIO_SWPORTA_DR, bit)
    } else {
        regs.test_bit(GPIO_EXT_PORTA, bit)
    }
}
