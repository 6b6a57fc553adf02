//! MCP23008 / MCP23017 register map, `IOCON.BANK = 0` addressing.

use bitflags::bitflags;

pub const PINS_PER_PORT: u32 = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Variant {
    /// One 8-bit port.
    Mcp23008,
    /// Two 8-bit ports, A and B.
    Mcp23017,
}

impl Variant {
    pub const fn name(self) -> &'static str {
        match self {
            Variant::Mcp23008 => "MCP23008",
            Variant::Mcp23017 => "MCP23017",
        }
    }

    pub const fn ports(self) -> usize {
        match self {
            Variant::Mcp23008 => 1,
            Variant::Mcp23017 => 2,
        }
    }

    pub const fn pins(self) -> u32 {
        self.ports() as u32 * PINS_PER_PORT
    }

    /// Address of `register` for `port`.
    ///
    /// With `BANK = 0` the MCP23017 interleaves the A and B copies of each
    /// register, so a port pair is always two consecutive addresses.
    pub const fn address(self, register: Register, port: usize) -> u8 {
        match self {
            Variant::Mcp23008 => register as u8,
            Variant::Mcp23017 => register as u8 * 2 + port as u8,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    /// Direction, 1 = input.
    IoDir = 0,
    IPol = 1,
    /// Interrupt-on-change enable.
    GpIntEn = 2,
    /// Compare value for `IntCon` pins.
    DefVal = 3,
    /// 1 = compare against `DefVal`, 0 = compare against previous value.
    IntCon = 4,
    IoCon = 5,
    GpPu = 6,
    /// Interrupt flags, read-only.
    IntF = 7,
    /// Port value captured at interrupt time. Reading it clears the interrupt.
    IntCap = 8,
    Gpio = 9,
    OLat = 10,
}

bitflags! {
    /// Device configuration register. Shared by both ports.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct IoCon: u8 {
        /// Interrupt output active high.
        const INTPOL = 1 << 1;
        /// Interrupt output open drain, overrides `INTPOL`.
        const ODR = 1 << 2;
        const HAEN = 1 << 3;
        const DISSLW = 1 << 4;
        /// Disable address auto-increment.
        const SEQOP = 1 << 5;
        /// Tie INTA and INTB together.
        const MIRROR = 1 << 6;
        /// Separate register banks per port.
        const BANK = 1 << 7;
    }
}

/// `(bit, captured value)` for every bit set in `flags`.
pub fn flagged_edges(flags: u8, capture: u8) -> impl Iterator<Item = (u32, bool)> {
    (0..PINS_PER_PORT)
        .filter(move |bit| flags & (1 << bit) != 0)
        .map(move |bit| (bit, capture & (1 << bit) != 0))
}
