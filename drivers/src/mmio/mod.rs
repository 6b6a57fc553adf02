//! Memory-mapped register access.
//!
//! A [`RegionManager`] owns every mapping a backend uses. Backends only ever
//! see [`RegisterWindow`] handles and touch registers through the
//! bounds-checked [`WindowGuard`] that [`RegisterWindow::lock`] returns.

mod memory;
mod region;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod devmem;
    }
}

pub use memory::SimulatedMemory;
pub use region::{RegionManager, RegisterWindow, WindowGuard};
