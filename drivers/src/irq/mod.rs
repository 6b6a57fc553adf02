//! Edge detection, debouncing and listener fan-out.

mod debounce;
mod dispatch;
mod poll;

pub use debounce::{Debounced, Debouncer};
pub use dispatch::{Dispatcher, DispatcherHandle};
pub use poll::LevelPoller;
