//! Operating modes and pin electrical configuration.

use bitflags::bitflags;
use core::fmt;

/// Logical function a pin can be switched into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    DigitalInput,
    DigitalOutput,
    PwmOutput,
    AnalogInput,
    AnalogOutput,
    I2c,
    Spi,
    Serial,
    I2s,
    /// A mode code the backend could not map to any logical function.
    Unknown,
}

impl DeviceMode {
    /// Capability flag for this mode. `Unknown` has none.
    pub const fn flag(self) -> ModeSet {
        match self {
            DeviceMode::DigitalInput => ModeSet::DIGITAL_INPUT,
            DeviceMode::DigitalOutput => ModeSet::DIGITAL_OUTPUT,
            DeviceMode::PwmOutput => ModeSet::PWM_OUTPUT,
            DeviceMode::AnalogInput => ModeSet::ANALOG_INPUT,
            DeviceMode::AnalogOutput => ModeSet::ANALOG_OUTPUT,
            DeviceMode::I2c => ModeSet::I2C,
            DeviceMode::Spi => ModeSet::SPI,
            DeviceMode::Serial => ModeSet::SERIAL,
            DeviceMode::I2s => ModeSet::I2S,
            DeviceMode::Unknown => ModeSet::empty(),
        }
    }

    pub const fn is_digital(self) -> bool {
        matches!(self, DeviceMode::DigitalInput | DeviceMode::DigitalOutput)
    }

    /// True for modes that route the pin to a peripheral block.
    pub const fn is_alternate(self) -> bool {
        !self.is_digital() && !matches!(self, DeviceMode::Unknown)
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::DigitalInput => "digital input",
            DeviceMode::DigitalOutput => "digital output",
            DeviceMode::PwmOutput => "PWM output",
            DeviceMode::AnalogInput => "analog input",
            DeviceMode::AnalogOutput => "analog output",
            DeviceMode::I2c => "I2C",
            DeviceMode::Spi => "SPI",
            DeviceMode::Serial => "serial",
            DeviceMode::I2s => "I2S",
            DeviceMode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// The capability set of a pin.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ModeSet: u16 {
        const DIGITAL_INPUT = 1 << 0;
        const DIGITAL_OUTPUT = 1 << 1;
        const PWM_OUTPUT = 1 << 2;
        const ANALOG_INPUT = 1 << 3;
        const ANALOG_OUTPUT = 1 << 4;
        const I2C = 1 << 5;
        const SPI = 1 << 6;
        const SERIAL = 1 << 7;
        const I2S = 1 << 8;

        const DIGITAL = Self::DIGITAL_INPUT.bits() | Self::DIGITAL_OUTPUT.bits();
    }
}

impl ModeSet {
    pub fn supports(self, mode: DeviceMode) -> bool {
        let flag = mode.flag();
        !flag.is_empty() && self.contains(flag)
    }
}

impl From<DeviceMode> for ModeSet {
    fn from(mode: DeviceMode) -> Self {
        mode.flag()
    }
}

impl FromIterator<DeviceMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = DeviceMode>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ModeSet::empty(), |set, mode| set | mode.flag())
    }
}

/// Internal pull resistor configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum PullUpDown {
    /// No pull resistor (high impedance).
    #[default]
    None,
    PullUp,
    PullDown,
}

/// Which edges of an input produce events.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Trigger {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl Trigger {
    /// Whether a transition to `value` is reported under this trigger.
    pub const fn accepts(self, value: bool) -> bool {
        match self {
            Trigger::None => false,
            Trigger::Rising => value,
            Trigger::Falling => !value,
            Trigger::Both => true,
        }
    }
}
