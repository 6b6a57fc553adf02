//! Registry configuration.
//!
//! Linux hosts map `/dev/mem` by default. Everything else, or a build with
//! the `simulated` feature, gets heap-backed register memory.

use crate::error::{Error, Result};
use crate::mmio::SimulatedMemory;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_MEM_DEVICE: &str = "SBCIO_MEM_DEVICE";
pub const ENV_GPIOMEM: &str = "SBCIO_GPIOMEM";
pub const ENV_POLL_INTERVAL_US: &str = "SBCIO_POLL_INTERVAL_US";
pub const ENV_DEBOUNCE_MS: &str = "SBCIO_DEBOUNCE_MS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Where register windows come from.
#[derive(Debug, Clone)]
pub enum MemorySource {
    /// Full physical memory device, offsets are physical addresses.
    DevMem(PathBuf),
    /// Raspberry Pi GPIO-only device. The kernel always maps the GPIO block
    /// regardless of the requested offset.
    GpioMem(PathBuf),
    Simulated(Arc<SimulatedMemory>),
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", not(feature = "simulated")))] {
        impl Default for MemorySource {
            fn default() -> Self {
                MemorySource::DevMem(PathBuf::from("/dev/mem"))
            }
        }
    } else {
        impl Default for MemorySource {
            fn default() -> Self {
                MemorySource::Simulated(SimulatedMemory::new())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub memory: MemorySource,
    /// Sampling period of the level poller that turns native inputs into edges.
    pub poll_interval: Duration,
    /// Debounce window for inputs that do not ask for one.
    pub default_debounce: Duration,
    /// Directory holding the `i2c-<n>` character devices.
    pub i2c_dev_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: MemorySource::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_debounce: Duration::ZERO,
            i2c_dev_dir: PathBuf::from("/dev"),
        }
    }
}

impl Config {
    pub fn simulated(memory: Arc<SimulatedMemory>) -> Self {
        Self::default().with_memory(MemorySource::Simulated(memory))
    }

    pub fn with_memory(mut self, memory: MemorySource) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_default_debounce(mut self, window: Duration) -> Self {
        self.default_debounce = window;
        self
    }

    pub fn with_i2c_dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.i2c_dev_dir = dir.into();
        self
    }

    /// Defaults overridden by `SBCIO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = lookup(ENV_GPIOMEM) {
            config.memory = MemorySource::GpioMem(PathBuf::from(path));
        } else if let Some(path) = lookup(ENV_MEM_DEVICE) {
            config.memory = if path == "simulated" {
                MemorySource::Simulated(SimulatedMemory::new())
            } else {
                MemorySource::DevMem(PathBuf::from(path))
            };
        }
        if let Some(us) = lookup(ENV_POLL_INTERVAL_US) {
            let us = parse_number(ENV_POLL_INTERVAL_US, &us)?;
            if us == 0 {
                return Err(Error::Config(format!("{ENV_POLL_INTERVAL_US} must be non-zero")));
            }
            config.poll_interval = Duration::from_micros(us);
        }
        if let Some(ms) = lookup(ENV_DEBOUNCE_MS) {
            config.default_debounce = Duration::from_millis(parse_number(ENV_DEBOUNCE_MS, &ms)?);
        }

        log::debug!("configuration: {config:?}");
        Ok(config)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}={value:?} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn default_memory_follows_target() {
        let memory = MemorySource::default();
        if cfg!(all(target_os = "linux", not(feature = "simulated"))) {
            assert!(matches!(memory, MemorySource::DevMem(ref path) if path.as_path() == std::path::Path::new("/dev/mem")));
        } else {
            assert!(matches!(memory, MemorySource::Simulated(_)));
        }
    }

    #[test]
    fn env_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_MEM_DEVICE, "/dev/mem"),
            (ENV_POLL_INTERVAL_US, "250"),
            (ENV_DEBOUNCE_MS, "20"),
        ]))
        .unwrap();
        assert!(matches!(config.memory, MemorySource::DevMem(ref p) if p == &PathBuf::from("/dev/mem")));
        assert_eq!(config.poll_interval, Duration::from_micros(250));
        assert_eq!(config.default_debounce, Duration::from_millis(20));
    }

    #[test]
    fn gpiomem_wins_over_mem_device() {
        let config = Config::from_lookup(lookup(&[
            (ENV_MEM_DEVICE, "/dev/mem"),
            (ENV_GPIOMEM, "/dev/gpiomem"),
        ]))
        .unwrap();
        assert!(matches!(config.memory, MemorySource::GpioMem(_)));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[(ENV_POLL_INTERVAL_US, "fast")])),
            Err(Error::Config(_))
        ));
        assert!(Config::from_lookup(lookup(&[(ENV_POLL_INTERVAL_US, "0")])).is_err());
    }
}
