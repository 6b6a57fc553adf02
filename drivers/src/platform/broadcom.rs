//! Broadcom BCM283x / BCM2711 GPIO register map.
//!
//! One 3-bit function select field per pin, ten pins per GPFSEL word.
//! Output levels go through the write-one GPSET/GPCLR registers and pin
//! levels come from GPLEV. The two generations differ only in their pull
//! registers: the BCM2835 family clocks a pull code into each pin and cannot
//! read it back, the BCM2711 has plain 2-bit pull fields.

use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use crate::platform::Soc;
use common::{DeviceMode, PullUpDown, bits};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Offset of the GPIO block from the peripheral base.
pub const GPIO_OFFSET: u64 = 0x20_0000;
const GPIO_WINDOW_LEN: usize = 0xf4;

const GPFSEL0: usize = 0;
const GPSET0: usize = 7;
const GPCLR0: usize = 10;
const GPLEV0: usize = 13;
const GPPUD: usize = 37;
const GPPUDCLK0: usize = 38;
const GPIO_PUP_PDN_CNTRL0: usize = 57;

/// Cycles to hold each step of the pull clocking sequence.
const PULL_SETUP_CYCLES: u32 = 150;

/// GPIO function selection.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

impl Function {
    const ALTERNATES: [Function; 6] = [
        Function::Alt0,
        Function::Alt1,
        Function::Alt2,
        Function::Alt3,
        Function::Alt4,
        Function::Alt5,
    ];

    fn from_code(code: u32) -> Self {
        match code & 0b111 {
            0b000 => Function::Input,
            0b001 => Function::Output,
            0b100 => Function::Alt0,
            0b101 => Function::Alt1,
            0b110 => Function::Alt2,
            0b111 => Function::Alt3,
            0b011 => Function::Alt4,
            _ => Function::Alt5,
        }
    }
}

/// Peripheral routed to `gpio` by an alternate function.
fn alt_function(gpio: u32, function: Function) -> DeviceMode {
    use DeviceMode::*;
    use Function::*;

    match (function, gpio) {
        (Input, _) => DigitalInput,
        (Output, _) => DigitalOutput,
        (Alt0, 12 | 13 | 40 | 41 | 45) | (Alt1, 52 | 53) | (Alt5, 18 | 19) => PwmOutput,
        (Alt0, 0..=3 | 28 | 29) | (Alt1 | Alt2, 44 | 45) => I2c,
        (Alt0, 7..=11) | (Alt4, 16..=21 | 40..=45) => Spi,
        (Alt0, 14 | 15)
        | (Alt2, 36..=39)
        | (Alt3, 16 | 17 | 30..=33)
        | (Alt5, 14..=17 | 30..=33 | 40..=43) => Serial,
        _ => Unknown,
    }
}

/// Pull codes of the BCM2835 GPPUD register.
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
enum Pull {
    Off = 0b00,
    Down = 0b01,
    Up = 0b10,
}

impl From<PullUpDown> for Pull {
    fn from(pull: PullUpDown) -> Self {
        match pull {
            PullUpDown::None => Pull::Off,
            PullUpDown::PullUp => Pull::Up,
            PullUpDown::PullDown => Pull::Down,
        }
    }
}

/// Pull codes of the BCM2711 GPIO_PUP_PDN_CNTRL fields.
fn bcm2711_pull_code(pull: PullUpDown) -> u32 {
    match pull {
        PullUpDown::None => 0b00,
        PullUpDown::PullUp => 0b01,
        PullUpDown::PullDown => 0b10,
    }
}

fn bcm2711_pull(code: u32) -> PullUpDown {
    match code {
        0b01 => PullUpDown::PullUp,
        0b10 => PullUpDown::PullDown,
        _ => PullUpDown::None,
    }
}

fn pin_reg_and_bit(gpio: u32) -> (usize, u32) {
    ((gpio / 32) as usize, bits::bit(gpio % 32))
}

fn delay_cycles(count: u32) {
    for _ in 0..count {
        core::hint::spin_loop();
    }
}

fn encode_pull_shadow(pull: PullUpDown) -> u8 {
    match pull {
        PullUpDown::None => 0,
        PullUpDown::PullUp => 1,
        PullUpDown::PullDown => 2,
    }
}

fn decode_pull_shadow(value: u8) -> PullUpDown {
    match value {
        1 => PullUpDown::PullUp,
        2 => PullUpDown::PullDown,
        _ => PullUpDown::None,
    }
}

// ============================================================================
// HAL Implementation
// ============================================================================

#[derive(Debug)]
pub struct BroadcomGpio {
    soc: Soc,
    gpio_count: u32,
    regs: RegisterWindow,
    regions: Arc<RegionManager>,
    /// Last pull applied to each pin. Only consulted where the hardware has
    /// no pull readback.
    pulls: Vec<AtomicU8>,
}

impl BroadcomGpio {
    pub fn new(soc: Soc, regions: Arc<RegionManager>) -> Result<Self> {
        let base = Self::gpio_base(soc)
            .ok_or_else(|| Error::NotFound(format!("{soc} is not a Broadcom SoC")))?;
        let gpio_count = if soc == Soc::Bcm2711 { 58 } else { 54 };
        let regs = regions.map(base, GPIO_WINDOW_LEN)?;

        Ok(Self {
            soc,
            gpio_count,
            regs,
            regions,
            pulls: (0..gpio_count).map(|_| AtomicU8::new(0)).collect(),
        })
    }

    /// Physical address of the GPIO block for a Broadcom SoC.
    pub fn gpio_base(soc: Soc) -> Option<u64> {
        match soc {
            Soc::Bcm2835 => Some(0x2000_0000 + GPIO_OFFSET),
            Soc::Bcm2836 | Soc::Bcm2837 => Some(0x3f00_0000 + GPIO_OFFSET),
            Soc::Bcm2711 => Some(0xfe00_0000 + GPIO_OFFSET),
            _ => None,
        }
    }

    fn check_pin(&self, gpio: u32) -> Result<()> {
        if gpio < self.gpio_count {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{} has no GPIO {gpio}", self.soc)))
        }
    }

    fn has_pull_readback(&self) -> bool {
        self.soc == Soc::Bcm2711
    }

    /// Set the function of a GPIO pin.
    pub fn set_function(&self, gpio: u32, function: Function) -> Result<()> {
        self.check_pin(gpio)?;
        let word = GPFSEL0 + (gpio / 10) as usize;
        let shift = (gpio % 10) * 3;
        self.regs.lock()?.set_field(word, shift, 3, function as u32)
    }

    pub fn function(&self, gpio: u32) -> Result<Function> {
        self.check_pin(gpio)?;
        let word = GPFSEL0 + (gpio / 10) as usize;
        let shift = (gpio % 10) * 3;
        Ok(Function::from_code(self.regs.lock()?.field(word, shift, 3)?))
    }
}

impl GpioBackend for BroadcomGpio {
    fn name(&self) -> &'static str {
        self.soc.name()
    }

    fn mode(&self, gpio: u32) -> Result<DeviceMode> {
        Ok(alt_function(gpio, self.function(gpio)?))
    }

    fn set_mode(&self, gpio: u32, mode: DeviceMode) -> Result<()> {
        let function = match mode {
            DeviceMode::DigitalInput => Function::Input,
            DeviceMode::DigitalOutput => Function::Output,
            _ => Function::ALTERNATES
                .into_iter()
                .find(|f| alt_function(gpio, *f) == mode)
                .ok_or_else(|| Error::UnsupportedMode {
                    target: format!("{} GPIO {gpio}", self.soc),
                    mode,
                })?,
        };
        self.set_function(gpio, function)
    }

    fn pull(&self, gpio: u32) -> Result<PullUpDown> {
        self.check_pin(gpio)?;
        if self.has_pull_readback() {
            let word = GPIO_PUP_PDN_CNTRL0 + (gpio / 16) as usize;
            let shift = (gpio % 16) * 2;
            Ok(bcm2711_pull(self.regs.lock()?.field(word, shift, 2)?))
        } else {
            Ok(decode_pull_shadow(self.pulls[gpio as usize].load(Ordering::Acquire)))
        }
    }

    fn set_pull(&self, gpio: u32, pull: PullUpDown) -> Result<()> {
        self.check_pin(gpio)?;
        if self.has_pull_readback() {
            let word = GPIO_PUP_PDN_CNTRL0 + (gpio / 16) as usize;
            let shift = (gpio % 16) * 2;
            self.regs.lock()?.set_field(word, shift, 2, bcm2711_pull_code(pull))?;
        } else {
            let (reg, bit) = pin_reg_and_bit(gpio);
            let mut regs = self.regs.lock()?;

            regs.write(GPPUD, Pull::from(pull) as u32)?;
            delay_cycles(PULL_SETUP_CYCLES);

            regs.write(GPPUDCLK0 + reg, bit)?;
            delay_cycles(PULL_SETUP_CYCLES);

            regs.write(GPPUD, 0)?;
            regs.write(GPPUDCLK0 + reg, 0)?;
        }
        self.pulls[gpio as usize].store(encode_pull_shadow(pull), Ordering::Release);
        Ok(())
    }

    fn read(&self, gpio: u32) -> Result<bool> {
        self.check_pin(gpio)?;
        let (reg, bit) = pin_reg_and_bit(gpio);
        Ok(self.regs.lock()?.read(GPLEV0 + reg)? & bit != 0)
    }

    fn write(&self, gpio: u32, value: bool) -> Result<()> {
        self.check_pin(gpio)?;
        let (reg, bit) = pin_reg_and_bit(gpio);
        let word = if value { GPSET0 } else { GPCLR0 };
        // Write-one registers: other pins' bits are zero and stay unaffected.
        self.regs.lock()?.write(word + reg, bit)
    }

    fn release(&self) {
        self.regions.unmap(&self.regs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySource;
    use crate::mmio::SimulatedMemory;

    const BASE: u64 = 0x3f20_0000;

    fn backend(soc: Soc) -> (Arc<SimulatedMemory>, BroadcomGpio) {
        let memory = SimulatedMemory::new();
        let regions = Arc::new(RegionManager::new(MemorySource::Simulated(Arc::clone(&memory))));
        (memory, BroadcomGpio::new(soc, regions).unwrap())
    }

    fn word(memory: &SimulatedMemory, base: u64, index: usize) -> u32 {
        memory.peek(base + index as u64 * 4)
    }

    #[test]
    fn each_soc_maps_its_own_block() {
        for (soc, base, count) in [
            (Soc::Bcm2835, 0x2020_0000, 54),
            (Soc::Bcm2837, 0x3f20_0000, 54),
            (Soc::Bcm2711, 0xfe20_0000, 58),
        ] {
            assert_eq!(BroadcomGpio::gpio_base(soc), Some(base));
            let memory = SimulatedMemory::new();
            let regions = Arc::new(RegionManager::new(MemorySource::Simulated(Arc::clone(&memory))));
            memory.refuse(base);
            assert!(matches!(
                BroadcomGpio::new(soc, Arc::clone(&regions)),
                Err(Error::MapFailed { base: b, .. }) if b == base
            ));

            memory.allow(base);
            let gpio = BroadcomGpio::new(soc, regions).unwrap();
            assert!(gpio.read(count - 1).is_ok(), "{soc}");
            assert!(matches!(gpio.read(count), Err(Error::NotFound(_))));
        }
        assert_eq!(BroadcomGpio::gpio_base(Soc::Rk3399), None);
    }

    #[test]
    fn function_select_keeps_neighbours() {
        let (memory, gpio) = backend(Soc::Bcm2837);
        gpio.set_mode(17, DeviceMode::DigitalOutput).unwrap();
        gpio.set_mode(18, DeviceMode::PwmOutput).unwrap();
        gpio.set_mode(17, DeviceMode::DigitalInput).unwrap();

        assert_eq!(gpio.mode(17).unwrap(), DeviceMode::DigitalInput);
        assert_eq!(gpio.mode(18).unwrap(), DeviceMode::PwmOutput);
        // GPIO18 is ALT5 (0b010) at bits 24..27 of GPFSEL1.
        assert_eq!(word(&memory, BASE, 1), 0b010 << 24);
    }

    #[test]
    fn alternate_functions_decode_per_pin() {
        let (_memory, gpio) = backend(Soc::Bcm2837);
        gpio.set_mode(2, DeviceMode::I2c).unwrap();
        gpio.set_mode(14, DeviceMode::Serial).unwrap();
        gpio.set_mode(10, DeviceMode::Spi).unwrap();
        assert_eq!(gpio.function(2).unwrap(), Function::Alt0);
        assert_eq!(gpio.mode(14).unwrap(), DeviceMode::Serial);
        assert_eq!(gpio.mode(10).unwrap(), DeviceMode::Spi);

        gpio.set_function(4, Function::Alt3).unwrap();
        assert_eq!(gpio.mode(4).unwrap(), DeviceMode::Unknown);
    }

    #[test]
    fn unroutable_alternate_is_rejected() {
        let (_memory, gpio) = backend(Soc::Bcm2837);
        assert!(matches!(
            gpio.set_mode(4, DeviceMode::I2c),
            Err(Error::UnsupportedMode { mode: DeviceMode::I2c, .. })
        ));
        assert!(matches!(gpio.mode(54), Err(Error::NotFound(_))));
    }

    #[test]
    fn writes_land_in_set_and_clear_registers() {
        let (memory, gpio) = backend(Soc::Bcm2837);
        gpio.write(35, true).unwrap();
        assert_eq!(word(&memory, BASE, GPSET0 + 1), 1 << 3);
        gpio.write(4, false).unwrap();
        assert_eq!(word(&memory, BASE, GPCLR0), 1 << 4);
    }

    #[test]
    fn read_samples_level_register() {
        let (memory, gpio) = backend(Soc::Bcm2837);
        memory.poke(BASE + (GPLEV0 as u64 + 1) * 4, 1 << 1);
        assert!(gpio.read(33).unwrap());
        assert!(!gpio.read(32).unwrap());
        assert!(!gpio.read(1).unwrap());
    }

    #[test]
    fn legacy_pull_sequence_leaves_registers_idle() {
        let (memory, gpio) = backend(Soc::Bcm2837);
        for pull in [PullUpDown::PullUp, PullUpDown::PullDown, PullUpDown::None] {
            gpio.set_pull(40, pull).unwrap();
            assert_eq!(gpio.pull(40).unwrap(), pull);
            assert_eq!(word(&memory, BASE, GPPUD), 0);
            assert_eq!(word(&memory, BASE, GPPUDCLK0 + 1), 0);
        }
    }

    #[test]
    fn bcm2711_pull_fields_round_trip() {
        let (memory, gpio) = backend(Soc::Bcm2711);
        let base = 0xfe20_0000;
        gpio.set_pull(17, PullUpDown::PullUp).unwrap();
        gpio.set_pull(16, PullUpDown::PullDown).unwrap();
        assert_eq!(gpio.pull(17).unwrap(), PullUpDown::PullUp);
        assert_eq!(gpio.pull(16).unwrap(), PullUpDown::PullDown);
        assert_eq!(word(&memory, base, GPIO_PUP_PDN_CNTRL0 + 1), 0b01_10);
        assert!(gpio.read(57).is_ok());
    }
}
