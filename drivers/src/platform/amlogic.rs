//! Amlogic S905 (ODROID-C2) and S922X (ODROID-N2) GPIO.
//!
//! Unlike the other families there is no function-select field to decode.
//! Each bank has its own set of one-bit-per-pin registers: output enable
//! (active low, a set bit means input), output, input, pull enable and
//! pull select (set means pull-up). The always-on bank of the S905 packs two
//! of those into one word: output enable and output share a word with the
//! output bits 16 positions up, and likewise pull enable and pull select.
//!
//! GPIO numbers are the ones the mainline kernel assigns, which is what
//! board detection reports on these boards.

use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use crate::platform::{Soc, map_windows};
use common::{DeviceMode, PullUpDown};
use std::ops::RangeInclusive;
use std::sync::Arc;

const BLOCK_SIZE: usize = 0x1000;

/// One bank's registers, as word offsets into `window`.
#[derive(Debug)]
struct Bank {
    name: &'static str,
    gpios: RangeInclusive<u32>,
    window: usize,
    oen: usize,
    out: usize,
    input: usize,
    pull_enable: usize,
    pull_select: usize,
    /// Bit offset of the output and pull-select fields inside their words.
    upper: u32,
}

struct Layout {
    windows: &'static [u64],
    banks: &'static [Bank],
}

const S905_PERIPHS: u64 = 0xc883_4000;
const S905_AO: u64 = 0xc810_0000;

const S905: Layout = Layout {
    windows: &[S905_PERIPHS, S905_AO],
    banks: &[
        Bank {
            name: "GPIODV",
            gpios: 423..=452,
            window: 0,
            oen: 0x10c,
            out: 0x10d,
            input: 0x10e,
            pull_enable: 0x148,
            pull_select: 0x13a,
            upper: 0,
        },
        Bank {
            name: "GPIOY",
            gpios: 453..=469,
            window: 0,
            oen: 0x10f,
            out: 0x110,
            input: 0x111,
            pull_enable: 0x149,
            pull_select: 0x13b,
            upper: 0,
        },
        Bank {
            name: "GPIOX",
            gpios: 470..=492,
            window: 0,
            oen: 0x118,
            out: 0x119,
            input: 0x11a,
            pull_enable: 0x14c,
            pull_select: 0x13e,
            upper: 0,
        },
        Bank {
            name: "GPIOAO",
            gpios: 497..=511,
            window: 1,
            oen: 0x09,
            out: 0x09,
            input: 0x0a,
            pull_enable: 0x0b,
            pull_select: 0x0b,
            upper: 16,
        },
    ],
};

/// Page-aligned: the bank registers start 0x400 bytes in, which the word
/// offsets already include.
const S922X_PERIPHS: u64 = 0xff63_4000;

const S922X: Layout = Layout {
    windows: &[S922X_PERIPHS],
    banks: &[
        Bank {
            name: "GPIOA",
            gpios: 460..=475,
            window: 0,
            oen: 0x120,
            out: 0x121,
            input: 0x122,
            pull_enable: 0x14d,
            pull_select: 0x13f,
            upper: 0,
        },
        Bank {
            name: "GPIOX",
            gpios: 476..=495,
            window: 0,
            oen: 0x116,
            out: 0x117,
            input: 0x118,
            pull_enable: 0x14a,
            pull_select: 0x13c,
            upper: 0,
        },
    ],
};

#[derive(Debug)]
pub struct AmlogicGpio {
    soc: Soc,
    banks: &'static [Bank],
    windows: Vec<RegisterWindow>,
    regions: Arc<RegionManager>,
}

impl AmlogicGpio {
    pub fn new(soc: Soc, regions: Arc<RegionManager>) -> Result<Self> {
        let layout = match soc {
            Soc::AmlogicS905 => &S905,
            Soc::AmlogicS922X => &S922X,
            other => return Err(Error::NotFound(format!("{other} is not an Amlogic SoC"))),
        };

        let windows = map_windows(&regions, layout.windows.iter().copied(), BLOCK_SIZE)?;
        Ok(Self {
            soc,
            banks: layout.banks,
            windows,
            regions,
        })
    }

    /// The pin's bank and its bit inside the bank registers.
    fn locate(&self, gpio: u32) -> Result<(&Bank, &RegisterWindow, u32)> {
        let bank = self
            .banks
            .iter()
            .find(|bank| bank.gpios.contains(&gpio))
            .ok_or_else(|| Error::NotFound(format!("{} has no GPIO {gpio}", self.soc)))?;
        Ok((bank, &self.windows[bank.window], gpio - bank.gpios.start()))
    }
}

impl GpioBackend for AmlogicGpio {
    fn name(&self) -> &'static str {
        self.soc.name()
    }

    fn mode(&self, gpio: u32) -> Result<DeviceMode> {
        let (bank, window, bit) = self.locate(gpio)?;
        Ok(if window.lock()?.test_bit(bank.oen, bit)? {
            DeviceMode::DigitalInput
        } else {
            DeviceMode::DigitalOutput
        })
    }

    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()> {
        let (bank, window, bit) = self.locate(gpio)?;
        let input = match mode {
            DeviceMode::DigitalInput => true,
            DeviceMode::DigitalOutput => false,
            mode => {
                return Err(Error::UnsupportedMode {
                    target: format!("{} {} pin {bit}", self.soc, bank.name),
                    mode,
                });
            }
        };
        window.lock()?.set_field(bank.oen, bit, 1, u32::from(input))
    }

    fn pull(&self, gpio: u32) -> Result<PullUpDown> {
        let (bank, window, bit) = self.locate(gpio)?;
        let regs = window.lock()?;
        if !regs.test_bit(bank.pull_enable, bit)? {
            return Ok(PullUpDown::None);
        }
        Ok(if regs.test_bit(bank.pull_select, bit + bank.upper)? {
            PullUpDown::PullUp
        } else {
            PullUpDown::PullDown
        })
    }

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()> {
        let (bank, window, bit) = self.locate(gpio)?;
        let mut regs = window.lock()?;
        if pull == PullUpDown::None {
            return regs.set_field(bank.pull_enable, bit, 1, 0);
        }
        // Select the direction before enabling so the pin never sees the
        // stale one.
        let up = u32::from(pull == PullUpDown::PullUp);
        regs.set_field(bank.pull_select, bit + bank.upper, 1, up)?;
        regs.set_field(bank.pull_enable, bit, 1, 1)
    }

    fn read(&self, gpio: u32) -> Result<bool> {
        let (bank, window, bit) = self.locate(gpio)?;
        window.lock()?.test_bit(bank.input, bit)
    }

    fn write(&self, gpio: u32, value: bool) -> Result<()> {
        let (bank, window, bit) = self.locate(gpio)?;
        window
            .lock()?
            .set_field(bank.out, bit + bank.upper, 1, u32::from(value))
    }

    fn release(&self) {
        for window in &self.windows {
            self.regions.unmap(window);
        }
    }
}
