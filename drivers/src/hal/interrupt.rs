//! Edge events and interrupt demultiplexing.

use crate::error::Result;
use common::ResourceKey;
use core::fmt;
use std::time::Instant;

/// Identity of one interrupt binding inside a dispatcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub(crate) u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

/// An undebounced edge as seen by the hardware or a poller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RawEdge {
    pub binding: BindingId,
    pub value: bool,
    pub timestamp: Instant,
}

/// A debounced edge delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinEvent {
    pub key: ResourceKey,
    pub value: bool,
    /// When the first raw edge of the burst was seen.
    pub timestamp: Instant,
}

/// Splits one physical interrupt line into logical pin edges.
///
/// Given the raw edge on the shared line, returns one `(binding, value)`
/// pair per logical pin that changed. Zero pairs is a valid answer.
pub trait InterruptDemux: Send + Sync {
    fn service(&self, edge: &RawEdge) -> Result<Vec<(BindingId, bool)>>;
}
