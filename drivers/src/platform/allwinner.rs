//! Allwinner H3 / H5 / H6 / R8 port controller.
//!
//! Pins are grouped in banks of up to 32 (PA, PB, ...). Each bank has a
//! 0x24-byte register block: four CFG words with a 4-bit field per pin
//! (3 value bits, 1 reserved), the DAT word and two PUL words with 2-bit
//! fields. Banks from PL onwards live in a second window owned by the
//! CPUS domain. The R8 (C.H.I.P.) stops at PG and has no such window.

use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use crate::platform::{Soc, map_windows};
use common::{DeviceMode, PullUpDown};
use std::sync::Arc;

const BANK_STRIDE: usize = 0x24 / 4;
const CFG0: usize = 0x00 / 4;
const DAT: usize = 0x10 / 4;
const PUL0: usize = 0x1c / 4;

/// First bank served by the CPUS port window.
const BANK_L: u32 = 11;
const WINDOW_LEN: usize = 0x400;

const MODE_INPUT: u32 = 0b000;
const MODE_OUTPUT: u32 = 0b001;
const MODE_DISABLED: u32 = 0b111;
const ALT_CODES: core::ops::RangeInclusive<u32> = 0b010..=0b110;

#[derive(Debug)]
struct Layout {
    main_base: u64,
    l_base: Option<u64>,
    /// Pins implemented in each bank, indexed by bank number.
    banks: &'static [u32],
    alt_function: fn(u32, u32) -> DeviceMode,
}

const H3: Layout = Layout {
    main_base: 0x01c2_0000 + 0x800,
    l_base: Some(0x01f0_2000 + 0xc00),
    banks: &[22, 0, 19, 18, 16, 7, 14, 0, 0, 0, 0, 12],
    alt_function: h3_alt_function,
};

const H5: Layout = Layout {
    main_base: 0x01c2_0000 + 0x800,
    l_base: Some(0x01f0_2000 + 0xc00),
    banks: &[22, 0, 17, 18, 16, 7, 14, 0, 0, 0, 0, 12],
    alt_function: h5_alt_function,
};

const H6: Layout = Layout {
    main_base: 0x0300_b000,
    l_base: Some(0x0702_2000),
    banks: &[0, 0, 17, 27, 0, 7, 15, 11, 0, 0, 0, 11, 5],
    alt_function: h6_alt_function,
};

const R8: Layout = Layout {
    main_base: 0x01c2_0000 + 0x800,
    l_base: None,
    banks: &[0, 19, 20, 28, 12, 6, 13],
    alt_function: r8_alt_function,
};

fn h3_alt_function(gpio: u32, code: u32) -> DeviceMode {
    use DeviceMode::*;
    match (gpio, code) {
        (0..=5, 2) => Serial,
        (5 | 6, 3) => PwmOutput,
        (11 | 12, 2) | (18 | 19, 3) => I2c,
        (13..=16, 2) | (32..=35, 3) => Spi,
        (13..=16, 3) | (164, 3) | (198..=201, 2) => Serial,
        _ => Unknown,
    }
}

fn h5_alt_function(gpio: u32, code: u32) -> DeviceMode {
    use DeviceMode::*;
    match (gpio, code) {
        (0..=5, 2) => Serial,
        (5, 3) | (362, 2) => PwmOutput,
        (11 | 12, 2) | (18 | 19, 3) | (140 | 141, 2 | 3) | (352 | 353, 2) => I2c,
        (13..=16, 2) | (64..=67, 3) | (68, 4) => Spi,
        (13..=16, 3) | (162 | 164, 3) | (198..=201, 2) | (354 | 355, 2) => Serial,
        _ => Unknown,
    }
}

fn h6_alt_function(gpio: u32, code: u32) -> DeviceMode {
    use DeviceMode::*;
    match (gpio, code) {
        (64 | 66 | 67 | 69, 4) | (227..=230, 2) => Spi,
        (118, 2) | (360, 2) | (362, 3) => PwmOutput,
        (119..=122, 2) | (229 | 230, 4) | (352 | 353, 3) => I2c,
        (115..=122, 4) | (162 | 164, 3) | (198..=201, 2) | (224 | 225, 2) | (354 | 355, 2) => Serial,
        _ => Unknown,
    }
}

fn r8_alt_function(gpio: u32, code: u32) -> DeviceMode {
    match (gpio, code) {
        // PB2, PWM0.
        (34, 2) => DeviceMode::PwmOutput,
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
        _ => PullUpDown::None,
    }
}

/// Register coordinates of one pin.
struct PinRegs<'a> {
    window: &'a RegisterWindow,
    /// First word of the pin's bank block.
    bank_word: usize,
    index: u32,
}

impl PinRegs<'_> {
    fn cfg(&self) -> (usize, u32) {
        (self.bank_word + CFG0 + (self.index / 8) as usize, (self.index % 8) * 4)
    }

    fn pul(&self) -> (usize, u32) {
        (self.bank_word + PUL0 + (self.index / 16) as usize, (self.index % 16) * 2)
    }

    fn dat(&self) -> usize {
        self.bank_word + DAT
    }
}

#[derive(Debug)]
pub struct AllwinnerGpio {
    soc: Soc,
    layout: &'static Layout,
    main: RegisterWindow,
    /// Mapped only when the SoC has banks from PL onwards.
    l: Option<RegisterWindow>,
    regions: Arc<RegionManager>,
}

impl AllwinnerGpio {
    pub fn new(soc: Soc, regions: Arc<RegionManager>) -> Result<Self> {
        let layout = Self::layout_for(soc)?;
        let bases = core::iter::once(layout.main_base).chain(layout.l_base);
        let mut windows = map_windows(&regions, bases, WINDOW_LEN)?.into_iter();
        let main = windows
            .next()
            .ok_or_else(|| Error::Fatal(format!("{soc} port window was not mapped")))?;
        Ok(Self {
            soc,
            layout,
            main,
            l: windows.next(),
            regions,
        })
    }

    fn layout_for(soc: Soc) -> Result<&'static Layout> {
        match soc {
            Soc::AllwinnerH3 => Ok(&H3),
            Soc::AllwinnerH5 => Ok(&H5),
            Soc::AllwinnerH6 => Ok(&H6),
            Soc::AllwinnerR8 => Ok(&R8),
            other => Err(Error::NotFound(format!("{other} is not an Allwinner SoC"))),
        }
    }

    fn pin(&self, gpio: u32) -> Result<PinRegs<'_>> {
        let bank = gpio >> 5;
        let index = gpio % 32;
        let implemented = self.layout.banks.get(bank as usize).copied().unwrap_or(0);
        let not_found = || Error::NotFound(format!("{} has no GPIO {gpio}", self.soc));
        if index >= implemented {
            return Err(not_found());
        }

        let (window, bank_in_window) = if bank < BANK_L {
            (&self.main, bank)
        } else {
            (self.l.as_ref().ok_or_else(not_found)?, bank - BANK_L)
        };
        Ok(PinRegs {
            window,
            bank_word: bank_in_window as usize * BANK_STRIDE,
            index,
        })
    }
}

impl GpioBackend for AllwinnerGpio {
    fn name(&self) -> &'static str {
        self.soc.name()
    }

    fn mode(&self, gpio: u32) -> Result<DeviceMode> {
        let pin = self.pin(gpio)?;
        let (word, shift) = pin.cfg();
        let code = pin.window.lock()?.field(word, shift, 3)?;
        Ok(match code {
            MODE_INPUT => DeviceMode::DigitalInput,
            MODE_OUTPUT => DeviceMode::DigitalOutput,
            MODE_DISABLED => DeviceMode::Unknown,
            code => (self.layout.alt_function)(gpio, code),
        })
    }

    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()> {
        let pin = self.pin(gpio)?;
        let code = match mode {
            DeviceMode::DigitalInput => MODE_INPUT,
            DeviceMode::DigitalOutput => MODE_OUTPUT,
            _ => ALT_CODES
                .find(|code| (self.layout.alt_function)(gpio, *code) == mode)
                .ok_or_else(|| Error::UnsupportedMode {
                    target: format!("{} GPIO {gpio}", self.soc),
                    mode,
                })?,
        };
        let (word, shift) = pin.cfg();
        // Only the 3 value bits; the reserved bit of the nibble is preserved.
        pin.window.lock()?.set_field(word, shift, 3, code)
    }

    fn pull(&self, gpio: u32) -> Result<PullUpDown> {
        let pin = self.pin(gpio)?;
        let (word, shift) = pin.pul();
        Ok(decode_pull(pin.window.lock()?.field(word, shift, 2)?))
    }

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()> {
        let pin = self.pin(gpio)?;
        let (word, shift) = pin.pul();
        pin.window.lock()?.set_field(word, shift, 2, pull_code(pull))
    }

    fn read(&self, gpio: u32) -> Result<bool> {
        let pin = self.pin(gpio)?;
        pin.window.lock()?.test_bit(pin.dat(), pin.index)
    }

    fn write(&self, gpio: u32, value: bool) -> Result<()> {
        let pin = self.pin(gpio)?;
        pin.window.lock()?.set_field(pin.dat(), pin.index, 1, u32::from(value))
    }

    fn release(&self) {
        self.regions.unmap(&self.main);
        if let Some(l) = &self.l {
            self.regions.unmap(l);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySource;
    use crate::mmio::SimulatedMemory;

    fn backend(soc: Soc) -> (Arc<SimulatedMemory>, AllwinnerGpio) {
        let memory = SimulatedMemory::new();
        let regions = Arc::new(RegionManager::new(MemorySource::Simulated(Arc::clone(&memory))));
        (memory, AllwinnerGpio::new(soc, regions).unwrap())
    }

    #[test]
    fn cfg_nibbles_are_independent() {
        let (memory, gpio) = backend(Soc::AllwinnerH3);
        gpio.set_mode(0, DeviceMode::DigitalInput).unwrap();
        gpio.set_mode(1, DeviceMode::DigitalOutput).unwrap();
        assert_eq!(gpio.mode(0).unwrap(), DeviceMode::DigitalInput);
        assert_eq!(gpio.mode(1).unwrap(), DeviceMode::DigitalOutput);
        assert_eq!(memory.peek(H3.main_base), 0b0001_0000);
    }

    #[test]
    fn reserved_bit_survives_mode_change() {
        let (memory, gpio) = backend(Soc::AllwinnerH3);
        memory.poke(H3.main_base, 0b1000);
        gpio.set_mode(0, DeviceMode::DigitalOutput).unwrap();
        assert_eq!(memory.peek(H3.main_base), 0b1001);
    }

    #[test]
    fn data_round_trip_in_both_windows() {
        let (memory, gpio) = backend(Soc::AllwinnerH3);
        for pin in [6, 12, 64, 354] {
            gpio.write(pin, true).unwrap();
            assert!(gpio.read(pin).unwrap(), "GPIO {pin}");
            gpio.write(pin, false).unwrap();
            assert!(!gpio.read(pin).unwrap(), "GPIO {pin}");
        }
        gpio.write(354, true).unwrap();
        // PL2: first bank of the L window, DAT at +0x10.
        assert_eq!(memory.peek(H3.l_base.unwrap() + 0x10), 1 << 2);
    }

    #[test]
    fn pulls_use_per_pin_fields() {
        let (memory, gpio) = backend(Soc::AllwinnerH5);
        for pull in [PullUpDown::PullUp, PullUpDown::PullDown, PullUpDown::None] {
            gpio.set_pull(17, pull).unwrap();
            assert_eq!(gpio.pull(17).unwrap(), pull);
        }
        gpio.set_pull(16, PullUpDown::PullDown).unwrap();
        gpio.set_pull(17, PullUpDown::PullUp).unwrap();
        // PA16/PA17 sit in PUL1 (+0x20), fields 0 and 1.
        assert_eq!(memory.peek(H5.main_base + 0x20), 0b01_10);
    }

    #[test]
    fn alternate_function_tables() {
        let (_memory, gpio) = backend(Soc::AllwinnerH3);
        gpio.set_mode(5, DeviceMode::PwmOutput).unwrap();
        gpio.set_mode(13, DeviceMode::Serial).unwrap();
        gpio.set_mode(12, DeviceMode::I2c).unwrap();
        assert_eq!(gpio.mode(5).unwrap(), DeviceMode::PwmOutput);
        assert_eq!(gpio.mode(13).unwrap(), DeviceMode::Serial);
        assert_eq!(gpio.mode(12).unwrap(), DeviceMode::I2c);
        assert!(matches!(
            gpio.set_mode(7, DeviceMode::Spi),
            Err(Error::UnsupportedMode { .. })
        ));
    }

    #[test]
    fn unimplemented_pins_are_not_found() {
        let (_memory, gpio) = backend(Soc::AllwinnerH3);
        // PA has 22 pins, PB none, PL 12.
        assert!(gpio.read(21).is_ok());
        assert!(matches!(gpio.read(22), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(32), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(364), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(12 * 32), Err(Error::NotFound(_))));
    }

    #[test]
    fn r8_ports_b_and_g_keep_neighbours() {
        let (memory, gpio) = backend(Soc::AllwinnerR8);
        let pb = R8.main_base + 0x24;
        let pg = R8.main_base + 6 * 0x24;
        memory.poke(pb, 0x7777_7777);
        memory.poke(pg + 0x04, 0x7777_7777);
        memory.poke(pg + 0x1c, 0xffff_ffff);

        // PB2 to PWM, PG9 to output with a pull-down.
        gpio.set_mode(34, DeviceMode::PwmOutput).unwrap();
        gpio.set_mode(201, DeviceMode::DigitalOutput).unwrap();
        gpio.set_pull(201, PullUpDown::PullDown).unwrap();
        gpio.write(201, true).unwrap();

        assert_eq!(memory.peek(pb), 0x7777_7277);
        assert_eq!(memory.peek(pg + 0x04), 0x7777_7717);
        assert_eq!(memory.peek(pg + 0x1c), !(0b01 << 18));
        assert_eq!(memory.peek(pg + 0x10), 1 << 9);
        assert_eq!(gpio.mode(34).unwrap(), DeviceMode::PwmOutput);
        assert_eq!(gpio.pull(201).unwrap(), PullUpDown::PullDown);
        assert!(gpio.read(201).unwrap());
    }

    #[test]
    fn r8_has_no_port_a_or_l_window() {
        let (memory, gpio) = backend(Soc::AllwinnerR8);
        assert_eq!(memory.live_mappings(), 1);
        assert!(matches!(gpio.read(0), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(32 + 19), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(6 * 32 + 13), Err(Error::NotFound(_))));
        assert!(matches!(gpio.read(11 * 32), Err(Error::NotFound(_))));
        assert!(matches!(
            gpio.set_mode(35, DeviceMode::PwmOutput),
            Err(Error::UnsupportedMode { .. })
        ));
        gpio.release();
        assert_eq!(memory.live_mappings(), 0);
    }

    #[test]
    fn h6_bank_m_lives_in_l_window() {
        let (memory, gpio) = backend(Soc::AllwinnerH6);
        gpio.set_mode(384 + 4, DeviceMode::DigitalOutput).unwrap();
        // PM4: second bank of the L window, CFG0 nibble 4.
        assert_eq!(memory.peek(H6.l_base.unwrap() + 0x24), 1 << 16);
    }
}
