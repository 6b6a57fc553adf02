//! Rockchip RK3288 GPIO (ASUS Tinker Board).
//!
//! Nine bank controllers. Bank 0 has only 24 pins and sits in the PMU
//! domain together with its iomux and pull words; banks 1-8 are configured
//! through the GRF. GPIO numbers after bank 0 are shifted by the 8 pins
//! bank 0 lacks, so bank `n > 0` starts at `n * 32 - 8`.
//!
//! Iomux words are only known for the pins routed to the 40-pin header.
//! Bank 7 port C uses 4-bit iomux fields split over two words; every other
//! port uses 2-bit fields.

use super::{GPIO_SWPORTA_DDR, GPIO_SWPORTA_DR, map_blocks, read_bank};
use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use common::{DeviceMode, PullUpDown, bits};
use std::sync::Arc;

const PMU_BASE: u64 = 0xff73_0000;
const GRF_BASE: u64 = 0xff77_0000;
const GPIO0_BASE: u64 = 0xff75_0000;
const GPIO_BANK_STRIDE: u64 = 0x1_0000;
/// Banks 1-8 start two blocks further on than the stride suggests.
const GPIO_BANK_GAP: u64 = 0x2_0000;
const BANKS: u32 = 9;
const BANK0_PINS: u32 = 24;

const PMU_PULL0: usize = 0x64 / 4;
const GRF_PULL0: usize = 0x140 / 4;
const GRF_PULL_BANK_STRIDE: usize = 0x10 / 4;

/// Mux code that routes GPIO7_C6/C7 to PWM2/PWM3.
const PWM_MUX: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Domain {
    Pmu,
    Grf,
}

/// Where a pin's iomux field lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Iomux {
    domain: Domain,
    word: usize,
    shift: u32,
    width: u32,
}

fn iomux(gpio: u32) -> Option<Iomux> {
    let two_bit = |domain, offset: usize| Iomux {
        domain,
        word: offset / 4,
        shift: (gpio % 8) * 2,
        width: 2,
    };
    let four_bit = |offset: usize, index: u32| Iomux {
        domain: Domain::Grf,
        word: offset / 4,
        shift: (index % 4) * 4,
        width: 4,
    };

    Some(match gpio {
        17 => two_bit(Domain::Pmu, 0x8c),
        160..=167 => two_bit(Domain::Grf, 0x50),
        168..=171 => two_bit(Domain::Grf, 0x54),
        184 | 185 | 187 | 188 => two_bit(Domain::Grf, 0x5c),
        223 => two_bit(Domain::Grf, 0x6c),
        224..=226 => two_bit(Domain::Grf, 0x70),
        // GPIO7_C0..C3 and C4..C7.
        232..=235 => four_bit(0x74, gpio - 232),
        236..=239 => four_bit(0x78, gpio - 232),
        251..=255 => two_bit(Domain::Grf, 0x80),
        256 | 257 => two_bit(Domain::Grf, 0x84),
        _ => return None,
    })
}

fn alt_function(gpio: u32, code: u32) -> DeviceMode {
    match (gpio, code) {
        (238 | 239, PWM_MUX) => DeviceMode::PwmOutput,
        _ => DeviceMode::Unknown,
    }
}

fn pull_code(pull: PullUpDown) -> u32 {
    match pull {
        PullUpDown::None => 0b00,
        PullUpDown::PullUp => 0b01,
        PullUpDown::PullDown => 0b10,
    }
}

fn decode_pull(code: u32) -> PullUpDown {
    match code {
        0b01 => PullUpDown::PullUp,
        0b10 => PullUpDown::PullDown,
        // 0b11 is bus-hold, which has no pull resistor enabled.
        _ => PullUpDown::None,
    }
}

/// Bank number and bit inside the bank.
fn locate(gpio: u32) -> Result<(usize, u32)> {
    let (bank, bit) = if gpio < BANK0_PINS {
        (0, gpio)
    } else {
        ((gpio + 8) / 32, (gpio + 8) % 32)
    };
    if bank >= BANKS {
        return Err(Error::NotFound(format!("RK3288 has no GPIO {gpio}")));
    }
    Ok((bank as usize, bit))
}

#[derive(Debug)]
pub struct Rk3288Gpio {
    pmu: RegisterWindow,
    grf: RegisterWindow,
    banks: Vec<RegisterWindow>,
    regions: Arc<RegionManager>,
}

impl Rk3288Gpio {
    pub fn new(regions: Arc<RegionManager>) -> Result<Self> {
        let bases = [PMU_BASE, GRF_BASE]
            .into_iter()
            .chain((0..u64::from(BANKS)).map(bank_base));
        let mut mapped = map_blocks(&regions, bases)?.into_iter();
        let mut next = || {
            mapped
                .next()
                .ok_or_else(|| Error::Fatal("RK3288 window list exhausted".into()))
        };
        Ok(Self {
            pmu: next()?,
            grf: next()?,
            banks: (0..BANKS).map(|_| next()).collect::<Result<_>>()?,
            regions,
        })
    }

    fn domain(&self, domain: Domain) -> &RegisterWindow {
        match domain {
            Domain::Pmu => &self.pmu,
            Domain::Grf => &self.grf,
        }
    }

    fn iomux(gpio: u32) -> Result<Iomux> {
        iomux(gpio).ok_or_else(|| {
            Error::NotFound(format!("RK3288 GPIO {gpio} has no known iomux register"))
        })
    }

    fn set_iomux(&self, mux: Iomux, code: u32) -> Result<()> {
        self.domain(mux.domain)
            .lock()?
            .modify(mux.word, |w| bits::with_field_enabled(w, mux.shift, mux.width, code))
            .map(drop)
    }

    /// Pull word and field shift. Bank 0 pulls are in the PMU.
    fn pull_field(&self, gpio: u32) -> Result<(&RegisterWindow, usize, u32)> {
        let (bank, bit) = locate(gpio)?;
        let group = (bit / 8) as usize;
        let shift = (bit % 8) * 2;
        Ok(if bank == 0 {
            (&self.pmu, PMU_PULL0 + group, shift)
        } else {
            (
                &self.grf,
                GRF_PULL0 + (bank - 1) * GRF_PULL_BANK_STRIDE + group,
                shift,
            )
        })
    }
}

fn bank_base(bank: u64) -> u64 {
    if bank == 0 {
        GPIO0_BASE
    } else {
        GPIO0_BASE + bank * GPIO_BANK_STRIDE + GPIO_BANK_GAP
    }
}

impl GpioBackend for Rk3288Gpio {
    fn name(&self) -> &'static str {
        "RK3288"
    }

    fn mode(&self, gpio: u32) -> Result<DeviceMode> {
        let (bank, bit) = locate(gpio)?;
        let mux = Self::iomux(gpio)?;
        let code = self
            .domain(mux.domain)
            .lock()?
            .field(mux.word, mux.shift, mux.width)?;
        if code != 0 {
            return Ok(alt_function(gpio, code));
        }
        Ok(if self.banks[bank].lock()?.test_bit(GPIO_SWPORTA_DDR, bit)? {
            DeviceMode::DigitalOutput
        } else {
            DeviceMode::DigitalInput
        })
    }

    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()> {
        let (bank, bit) = locate(gpio)?;
        let mux = Self::iomux(gpio)?;
        let output = match mode {
            DeviceMode::DigitalInput => false,
            DeviceMode::DigitalOutput => true,
            DeviceMode::PwmOutput if alt_function(gpio, PWM_MUX) == DeviceMode::PwmOutput => {
                return self.set_iomux(mux, PWM_MUX);
            }
            mode => {
                return Err(Error::UnsupportedMode {
                    target: format!("RK3288 GPIO {gpio}"),
                    mode,
                });
            }
        };
        self.set_iomux(mux, 0)?;
        self.banks[bank]
            .lock()?
            .set_field(GPIO_SWPORTA_DDR, bit, 1, u32::from(output))
    }

    fn pull(&self, gpio: u32) -> Result<PullUpDown> {
        let (window, word, shift) = self.pull_field(gpio)?;
        Ok(decode_pull(window.lock()?.field(word, shift, 2)?))
    }

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()> {
        let (window, word, shift) = self.pull_field(gpio)?;
        window
            .lock()?
            .modify(word, |w| bits::with_field_enabled(w, shift, 2, pull_code(pull)))
            .map(drop)
    }

    fn read(&self, gpio: u32) -> Result<bool> {
        let (bank, bit) = locate(gpio)?;
        read_bank(&self.banks[bank], bit)
    }

    fn write(&self, gpio: u32, value: bool) -> Result<()> {
        let (bank, bit) = locate(gpio)?;
        self.banks[bank]
            .lock()?
            .set_field(GPIO_SWPORTA_DR, bit, 1, u32::from(value))
    }

    fn release(&self) {
        for window in [&self.pmu, &self.grf].into_iter().chain(&self.banks) {
            self.regions.unmap(window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySource;
    use crate::mmio::SimulatedMemory;

    fn backend() -> (Arc<SimulatedMemory>, Rk3288Gpio) {
        let memory = SimulatedMemory::new();
        let regions = Arc::new(RegionManager::new(MemorySource::Simulated(Arc::clone(&memory))));
        (memory, Rk3288Gpio::new(regions).unwrap())
    }

    #[test]
    fn banks_after_zero_are_shifted() {
        assert_eq!(locate(17).unwrap(), (0, 17));
        assert_eq!(locate(24).unwrap(), (1, 0));
        assert_eq!(locate(171).unwrap(), (5, 19));
        assert_eq!(locate(257).unwrap(), (8, 9));
        assert!(locate(280).is_err());
        assert_eq!(bank_base(0), 0xff75_0000);
        assert_eq!(bank_base(1), 0xff78_0000);
        assert_eq!(bank_base(8), 0xff7f_0000);
    }

    #[test]
    fn output_routes_to_gpio_and_sets_direction() {
        let (memory, gpio) = backend();
        // GPIO5_B4 muxed to something else at power-on.
        memory.poke(GRF_BASE + 0x50, 0b11 << 8);
        gpio.set_mode(164, DeviceMode::DigitalOutput).unwrap();

        let mux = memory.peek(GRF_BASE + 0x50);
        assert_eq!(mux & 0xffff, 0);
        assert_eq!(mux >> 16, 0b11 << 8);
        assert_eq!(memory.peek(bank_base(5) + 0x04), 1 << 12);
        assert_eq!(gpio.mode(164).unwrap(), DeviceMode::DigitalOutput);
    }

    #[test]
    fn port_7c_uses_four_bit_fields() {
        let (memory, gpio) = backend();
        gpio.set_mode(238, DeviceMode::PwmOutput).unwrap();
        gpio.set_mode(239, DeviceMode::DigitalInput).unwrap();
        assert_eq!(memory.peek(GRF_BASE + 0x78) & 0xffff, PWM_MUX << 8);
        assert_eq!(gpio.mode(238).unwrap(), DeviceMode::PwmOutput);
        assert_eq!(gpio.mode(239).unwrap(), DeviceMode::DigitalInput);

        gpio.set_mode(233, DeviceMode::DigitalOutput).unwrap();
        assert_eq!(memory.peek(GRF_BASE + 0x74) >> 16, 0xf << 4);
        assert!(matches!(
            gpio.set_mode(233, DeviceMode::PwmOutput),
            Err(Error::UnsupportedMode { .. })
        ));
    }

    #[test]
    fn pins_off_the_header_have_no_mode() {
        let (_memory, gpio) = backend();
        assert!(matches!(gpio.mode(30), Err(Error::NotFound(_))));
        assert!(matches!(
            gpio.set_mode(30, DeviceMode::DigitalOutput),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn data_round_trip() {
        let (_memory, gpio) = backend();
        for pin in [17, 164, 185, 223, 257] {
            gpio.set_mode(pin, DeviceMode::DigitalOutput).unwrap();
            gpio.write(pin, true).unwrap();
            assert!(gpio.read(pin).unwrap(), "GPIO {pin}");
            gpio.write(pin, false).unwrap();
            assert!(!gpio.read(pin).unwrap(), "GPIO {pin}");
        }
    }

    #[test]
    fn pull_round_trip_in_both_domains() {
        let (memory, gpio) = backend();
        for pin in [17, 166, 239] {
            for pull in [PullUpDown::PullUp, PullUpDown::PullDown, PullUpDown::None] {
                gpio.set_pull(pin, pull).unwrap();
                assert_eq!(gpio.pull(pin).unwrap(), pull, "GPIO {pin}");
            }
        }

        gpio.set_pull(17, PullUpDown::PullDown).unwrap();
        // GPIO0_C1: PMU pull word 2, field 1.
        assert_eq!(memory.peek(PMU_BASE + 0x6c) & 0xffff, 0b10 << 2);
        gpio.set_pull(166, PullUpDown::PullUp).unwrap();
        // GPIO5_B6: GRF bank 5 pull word 1, field 6.
        assert_eq!(memory.peek(GRF_BASE + 0x140 + 4 * 0x10 + 4) & 0xffff, 0b01 << 12);
    }
}
