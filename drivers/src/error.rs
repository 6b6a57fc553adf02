use common::{DeviceMode, PinNotFound, PullUpDown, ResourceKey};
use thiserror::Error;

/// Errors raised while provisioning or driving a resource.
///
/// None of these are retried internally: register writes are not safe to
/// replay blindly, so the caller decides.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} is already open")]
    AlreadyOpen(ResourceKey),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{target} does not support {mode}")]
    UnsupportedMode { target: String, mode: DeviceMode },
    #[error("{target} does not support pull {pull:?}")]
    UnsupportedPull { target: String, pull: PullUpDown },
    #[error("failed to map physical address {base:#x}: {reason}")]
    MapFailed { base: u64, reason: String },
    #[error("backend error: {0}")]
    BackendError(String),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A register offset or window state that indicates a backend bug.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<PinNotFound> for Error {
    fn from(err: PinNotFound) -> Self {
        Error::NotFound(err.to_string())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
