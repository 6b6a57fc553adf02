//! Pin capability table.
//!
//! The table is handed to the registry by whatever detected the board. It is
//! never mutated after [`PinTableBuilder::build`], so lookups need no locking.

use crate::mode::{DeviceMode, ModeSet};
use crate::pin::PinDescriptor;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// The requested pin is not declared by this board.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("pin {0} is not declared on this board")]
pub struct PinNotFound(pub u32);

#[derive(Debug, Clone, Default)]
pub struct PinTable {
    by_gpio: BTreeMap<u32, Arc<PinDescriptor>>,
    by_header: BTreeMap<u32, u32>,
}

impl PinTable {
    pub fn builder() -> PinTableBuilder {
        PinTableBuilder::default()
    }

    /// A plain table with every GPIO in `range` declared as digital in/out.
    pub fn digital(range: Range<u32>) -> Self {
        range
            .fold(PinTable::builder(), |builder, gpio| {
                builder.pin(PinDescriptor::new(gpio, format!("GPIO{gpio}"), ModeSet::DIGITAL))
            })
            .build()
    }

    pub fn lookup(&self, gpio: u32) -> Result<&Arc<PinDescriptor>, PinNotFound> {
        self.by_gpio.get(&gpio).ok_or(PinNotFound(gpio))
    }

    /// Look a pin up by its physical header position.
    pub fn lookup_header(&self, header: u32) -> Result<&Arc<PinDescriptor>, PinNotFound> {
        self.by_header
            .get(&header)
            .and_then(|gpio| self.by_gpio.get(gpio))
            .ok_or(PinNotFound(header))
    }

    pub fn supports(&self, descriptor: &PinDescriptor, mode: DeviceMode) -> bool {
        descriptor.supports(mode)
    }

    pub fn len(&self) -> usize {
        self.by_gpio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gpio.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PinDescriptor>> {
        self.by_gpio.values()
    }
}

#[derive(Debug, Default)]
pub struct PinTableBuilder {
    pins: Vec<PinDescriptor>,
}

impl PinTableBuilder {
    /// Declare a pin. A later declaration of the same GPIO replaces the earlier one.
    pub fn pin(mut self, descriptor: PinDescriptor) -> Self {
        self.pins.push(descriptor);
        self
    }

    pub fn build(self) -> PinTable {
        let mut table = PinTable::default();
        for descriptor in self.pins {
            if let Some(header) = descriptor.header {
                table.by_header.insert(header, descriptor.gpio);
            }
            table.by_gpio.insert(descriptor.gpio, Arc::new(descriptor));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> PinTable {
        PinTable::builder()
            .pin(PinDescriptor::new(17, "GPIO17", ModeSet::DIGITAL).with_header(11))
            .pin(
                PinDescriptor::new(18, "GPIO18", ModeSet::DIGITAL)
                    .with_header(12)
                    .with_pwm_channel(0),
            )
            .build()
    }

    #[test]
    fn lookup_by_gpio_and_header() {
        let table = board();
        assert_eq!(table.lookup(17).unwrap().name, "GPIO17");
        assert_eq!(table.lookup_header(12).unwrap().gpio, 18);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unknown_pin_is_not_found() {
        let table = board();
        assert_eq!(table.lookup(99).unwrap_err(), PinNotFound(99));
        assert!(table.lookup_header(1).is_err());
    }

    #[test]
    fn pwm_channel_adds_capability() {
        let table = board();
        let pin = table.lookup(18).unwrap();
        assert!(table.supports(pin, DeviceMode::PwmOutput));
        assert!(!table.supports(table.lookup(17).unwrap(), DeviceMode::PwmOutput));
    }

    #[test]
    fn digital_range_declares_every_pin() {
        let table = PinTable::digital(0..8);
        assert_eq!(table.len(), 8);
        assert!(table.lookup(7).unwrap().supports(DeviceMode::DigitalOutput));
        assert!(table.lookup(8).is_err());
    }
}
