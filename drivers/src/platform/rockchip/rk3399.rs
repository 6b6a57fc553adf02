//! Rockchip RK3399 GPIO.
//!
//! Pin functions and pulls live in the general register files (PMUGRF for
//! banks 0-1, GRF for banks 2-4) as 2-bit fields, eight pins per word.
//! Direction and data live in the five GPIO bank controllers. A bank's clock
//! has to be ungated before its direction register accepts writes.

use super::{GPIO_SWPORTA_DDR, GPIO_SWPORTA_DR, map_blocks, read_bank};
use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use common::{DeviceMode, PullUpDown, bits};
use std::sync::Arc;

const GRF_BASE: u64 = 0xff77_0000 + 0xe000;
const PMUGRF_BASE: u64 = 0xff32_0000;
const PMUCRU_BASE: u64 = 0xff75_0000;
const CRU_BASE: u64 = 0xff76_0000;
const GPIO_BANK_BASES: [u64; 5] = [
    0xff72_0000,
    0xff73_0000,
    0xff78_0000,
    0xff78_8000,
    0xff79_0000,
];
const IOMUX0: usize = 0x00 / 4;
const PULL0: usize = 0x40 / 4;

/// Clock gates for GPIO banks 0-1, bits 3-4.
const PMUCRU_CLKGATE_CON1: usize = 0x104 / 4;
/// Clock gates for GPIO banks 2-4, bits 3-5.
const CRU_CLKGATE_CON31: usize = 0x37c / 4;

const GPIO_COUNT: u32 = 160;
/// GPIO4_D2 onwards has no iomux field.
const FIRST_GPIO_ONLY: u32 = 154;

fn alt_function(gpio: u32, code: u32) -> DeviceMode {
    use DeviceMode::*;
    match (gpio, code) {
        (39 | 40, 1) | (112, 2) | (147 | 148, 1 | 2) => Serial,
        (39..=42, 2) | (73..=76, 1) => Spi,
        (64 | 65 | 71 | 72 | 73 | 74, 2) => I2c,
        (131..=135, 1) => I2s,
        (146 | 150, 1) => PwmOutput,
        _ => Unknown,
    }
}

/// Pins whose pull field uses the PE/PS encoding (`01` down, `11` up).
fn has_pe_ps_encoding(gpio: u32) -> bool {
    gpio < 32 || (80..96).contains(&gpio)
}

fn pull_code(gpio: u32, pull: PullUpDown) -> u32 {
    match (has_pe_ps_encoding(gpio), pull) {
        (_, PullUpDown::None) => 0b00,
        (true, PullUpDown::PullDown) => 0b01,
        (true, PullUpDown::PullUp) => 0b11,
        (false, PullUpDown::PullUp) => 0b01,
        (false, PullUpDown::PullDown) => 0b10,
    }
}

fn decode_pull(gpio: u32, code: u32) -> PullUpDown {
    match (has_pe_ps_encoding(gpio), code) {
        (true, 0b01) => PullUpDown::PullDown,
        (true, 0b11) => PullUpDown::PullUp,
        (false, 0b01) => PullUpDown::PullUp,
        (false, 0b10) => PullUpDown::PullDown,
        _ => PullUpDown::None,
    }
}

#[derive(Debug)]
pub struct Rk3399Gpio {
    grf: RegisterWindow,
    pmugrf: RegisterWindow,
    pmucru: RegisterWindow,
    cru: RegisterWindow,
    banks: Vec<RegisterWindow>,
    regions: Arc<RegionManager>,
}

impl Rk3399Gpio {
    pub fn new(regions: Arc<RegionManager>) -> Result<Self> {
        let bases = [GRF_BASE, PMUGRF_BASE, PMUCRU_BASE, CRU_BASE]
            .into_iter()
            .chain(GPIO_BANK_BASES);
        let mut mapped = map_blocks(&regions, bases)?.into_iter();
        let mut next = || {
            mapped
                .next()
                .ok_or_else(|| Error::Fatal("RK3399 window list exhausted".into()))
        };
        Ok(Self {
            grf: next()?,
            pmugrf: next()?,
            pmucru: next()?,
            cru: next()?,
            banks: (0..GPIO_BANK_BASES.len())
                .map(|_| next())
                .collect::<Result<_>>()?,
            regions,
        })
    }

    fn check_pin(gpio: u32) -> Result<()> {
        if gpio < GPIO_COUNT {
            Ok(())
        } else {
            Err(Error::NotFound(format!("RK3399 has no GPIO {gpio}")))
        }
    }

    fn bank(&self, gpio: u32) -> &RegisterWindow {
        &self.banks[(gpio >> 5) as usize]
    }

    /// GRF window and word holding the pin's field, counted from `first`.
    fn grf_word(&self, gpio: u32, first: usize) -> (&RegisterWindow, usize) {
        let bank = (gpio >> 5) as usize;
        let group = ((gpio % 32) / 8) as usize;
        if bank < 2 {
            (&self.pmugrf, first + bank * 4 + group)
        } else {
            (&self.grf, first + (bank - 2) * 4 + group)
        }
    }

    fn field_shift(gpio: u32) -> u32 {
        (gpio % 8) * 2
    }

    fn set_iomux(&self, gpio: u32, code: u32) -> Result<()> {
        let (window, word) = self.grf_word(gpio, IOMUX0);
        let shift = Self::field_shift(gpio);
        window
            .lock()?
            .modify(word, |w| bits::with_field_enabled(w, shift, 2, code))
            .map(drop)
    }

    /// Clear the bank's clock gate, with its write-enable bit.
    fn ungate_clock(&self, gpio: u32) -> Result<()> {
        let bank = gpio >> 5;
        let (window, word, bit) = if bank < 2 {
            (&self.pmucru, PMUCRU_CLKGATE_CON1, bank + 3)
        } else {
            (&self.cru, CRU_CLKGATE_CON31, bank + 1)
        };
        window
            .lock()?
            .modify(word, |w| bits::with_field_enabled(w, bit, 1, 0))
            .map(drop)
    }

    fn is_output(&self, gpio: u32) -> Result<bool> {
        self.bank(gpio).lock()?.test_bit(GPIO_SWPORTA_DDR, gpio % 32)
    }
}

impl GpioBackend for Rk3399Gpio {
    fn name(&self) -> &'static str {
        "RK3399"
    }

    fn mode(&self, gpio: u32) -> Result<DeviceMode> {
        Self::check_pin(gpio)?;
        let code = if gpio < FIRST_GPIO_ONLY {
            let (window, word) = self.grf_word(gpio, IOMUX0);
            window.lock()?.field(word, Self::field_shift(gpio), 2)?
        } else {
            0
        };

        if code != 0 {
            return Ok(alt_function(gpio, code));
        }
        Ok(if self.is_output(gpio)? {
            DeviceMode::DigitalOutput
        } else {
            DeviceMode::DigitalInput
        })
    }

    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()> {
        Self::check_pin(gpio)?;
        let unsupported = || Error::UnsupportedMode {
            target: format!("RK3399 GPIO {gpio}"),
            mode,
        };

        let output = match mode {
            DeviceMode::DigitalInput => false,
            DeviceMode::DigitalOutput => true,
            _ => {
                if gpio >= FIRST_GPIO_ONLY {
                    return Err(unsupported());
                }
                let code = (1..=3)
                    .find(|code| alt_function(gpio, *code) == mode)
                    .ok_or_else(unsupported)?;
                return self.set_iomux(gpio, code);
            }
        };

        // The direction register ignores writes while the bank clock is gated.
        self.ungate_clock(gpio)?;
        if gpio < FIRST_GPIO_ONLY {
            self.set_iomux(gpio, 0)?;
        }
        self.bank(gpio)
            .lock()?
            .set_field(GPIO_SWPORTA_DDR, gpio % 32, 1, u32::from(output))
    }

    fn pull(&self, gpio: u32) -> Result<PullUpDown> {
        Self::check_pin(gpio)?;
        let (window, word) = self.grf_word(gpio, PULL0);
        let code = window.lock()?.field(word, Self::field_shift(gpio), 2)?;
        Ok(decode_pull(gpio, code))
    }

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()> {
        Self::check_pin(gpio)?;
        let (window, word) = self.grf_word(gpio, PULL0);
        let shift = Self::field_shift(gpio);
        let code = pull_code(gpio, pull);
        window
            .lock()?
            .modify(word, |w| bits::with_field_enabled(w, shift, 2, code))
            .map(drop)
    }

    fn read(&self, gpio: u32) -> Result<bool> {
        Self::check_pin(gpio)?;
        read_bank(self.bank(gpio), gpio % 32)
    }

    fn write(&self, gpio: u32, value: bool) -> Result<()> {
        Self::check_pin(gpio)?;
        self.bank(gpio)
            .lock()?
            .set_field(GPIO_SWPORTA_DR, gpio % 32, 1, u32::from(value))
    }

    fn release(&self) {
        for window in [&self.grf, &self.pmugrf, &self.pmucru, &self.cru]
            .into_iter()
            .chain(&self.banks)
        {
            self.regions.unmap(window);
        }
    }
}
