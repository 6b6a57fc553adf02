//! Peripheral Drivers
//!
//! Drivers for chips attached to a bus rather than mapped into the SoC.
//!
//! # Available Peripherals
//!
//! - [`mcp23xxx`]: Microchip MCP23008 / MCP23017 I/O expanders

pub mod mcp23xxx;
