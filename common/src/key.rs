use crate::pin::PinDescriptor;
use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Gpio,
    I2c,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Gpio => "GPIO",
            ResourceKind::I2c => "I2C",
        }
    }
}

/// Canonical identity of a provisionable resource.
///
/// Two provisioning requests conflict exactly when their keys are equal.
/// Renders as `<prefix>-<KIND>-<controller>-<address>`, e.g. `Native-GPIO-0-17`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    prefix: String,
    kind: ResourceKind,
    controller: u32,
    address: u32,
}

impl ResourceKey {
    /// Prefix used for resources driven directly by the SoC.
    pub const NATIVE: &'static str = "Native";

    pub fn new(prefix: impl Into<String>, kind: ResourceKind, controller: u32, address: u32) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
            controller,
            address,
        }
    }

    pub fn gpio(prefix: impl Into<String>, descriptor: &PinDescriptor) -> Self {
        Self::new(prefix, ResourceKind::Gpio, 0, descriptor.gpio)
    }

    pub fn i2c(prefix: impl Into<String>, controller: u32, address: u16) -> Self {
        Self::new(prefix, ResourceKind::I2c, controller, u32::from(address))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn controller(&self) -> u32 {
        self.controller
    }

    pub fn address(&self) -> u32 {
        self.address
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.prefix,
            self.kind.as_str(),
            self.controller,
            self.address
        )
    }
}
