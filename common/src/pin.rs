use crate::mode::{DeviceMode, ModeSet};

/// Immutable metadata for one logical pin.
///
/// Built once when the board is described and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinDescriptor {
    /// Logical GPIO number as used by the register backend.
    pub gpio: u32,
    /// Position on the physical header, if the pin is broken out.
    pub header: Option<u32>,
    pub name: String,
    pub modes: ModeSet,
    /// Hardware bank the pin belongs to, where the board names banks.
    pub bank: Option<u32>,
    pub pwm_channel: Option<u32>,
}

impl PinDescriptor {
    pub fn new(gpio: u32, name: impl Into<String>, modes: ModeSet) -> Self {
        Self {
            gpio,
            header: None,
            name: name.into(),
            modes,
            bank: None,
            pwm_channel: None,
        }
    }

    pub fn with_header(mut self, header: u32) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_bank(mut self, bank: u32) -> Self {
        self.bank = Some(bank);
        self
    }

    pub fn with_pwm_channel(mut self, channel: u32) -> Self {
        self.pwm_channel = Some(channel);
        self.modes |= ModeSet::PWM_OUTPUT;
        self
    }

    pub fn supports(&self, mode: DeviceMode) -> bool {
        self.modes.supports(mode)
    }
}
