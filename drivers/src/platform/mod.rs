//! Platform Abstraction Layer
//!
//! One register backend per SoC family. The family is chosen once, when the
//! registry is built, from the [`Soc`] that board detection reports.
//! Which families are compiled in is controlled by Cargo features.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use sbcio_drivers::config::MemorySource;
//! use sbcio_drivers::mmio::RegionManager;
//! use sbcio_drivers::platform::{self, Soc};
//!
//! let regions = Arc::new(RegionManager::new(MemorySource::default()));
//! let backend = platform::create_backend(Soc::Bcm2837, &regions)?;
//! backend.write(17, true)?;
//! # Ok::<(), sbcio_drivers::Error>(())
//! ```

use crate::config::MemorySource;
use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::mmio::{RegionManager, RegisterWindow};
use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

#[cfg(feature = "allwinner")]
pub mod allwinner;
#[cfg(feature = "amlogic")]
pub mod amlogic;
#[cfg(feature = "broadcom")]
pub mod broadcom;
#[cfg(feature = "rockchip")]
pub mod rockchip;

cfg_if::cfg_if! {
    if #[cfg(not(any(
        feature = "broadcom",
        feature = "allwinner",
        feature = "amlogic",
        feature = "rockchip"
    )))] {
        compile_error!(
            "No register backend selected!\n\
            Use: cargo build --features broadcom\n\
            Or:  cargo build --features allwinner,rockchip"
        );
    }
}

/// SoC models with a memory-mapped GPIO backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Soc {
    Bcm2835,
    Bcm2836,
    Bcm2837,
    Bcm2711,
    AllwinnerH3,
    AllwinnerH5,
    AllwinnerH6,
    AllwinnerR8,
    AmlogicS905,
    AmlogicS922X,
    Rk3288,
    Rk3399,
}

impl Soc {
    pub const fn name(self) -> &'static str {
        match self {
            Soc::Bcm2835 => "BCM2835",
            Soc::Bcm2836 => "BCM2836",
            Soc::Bcm2837 => "BCM2837",
            Soc::Bcm2711 => "BCM2711",
            Soc::AllwinnerH3 => "H3",
            Soc::AllwinnerH5 => "H5",
            Soc::AllwinnerH6 => "H6",
            Soc::AllwinnerR8 => "R8",
            Soc::AmlogicS905 => "S905",
            Soc::AmlogicS922X => "S922X",
            Soc::Rk3288 => "RK3288",
            Soc::Rk3399 => "RK3399",
        }
    }

    pub const fn is_broadcom(self) -> bool {
        matches!(self, Soc::Bcm2835 | Soc::Bcm2836 | Soc::Bcm2837 | Soc::Bcm2711)
    }

    const ALL: [Soc; 12] = [
        Soc::Bcm2835,
        Soc::Bcm2836,
        Soc::Bcm2837,
        Soc::Bcm2711,
        Soc::AllwinnerH3,
        Soc::AllwinnerH5,
        Soc::AllwinnerH6,
        Soc::AllwinnerR8,
        Soc::AmlogicS905,
        Soc::AmlogicS922X,
        Soc::Rk3288,
        Soc::Rk3399,
    ];
}

impl fmt::Display for Soc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Soc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Soc::ALL
            .into_iter()
            .find(|soc| soc.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::NotFound(format!("unknown SoC {s:?}")))
    }
}

/// Build the register backend for `soc`, mapping its windows through `regions`.
///
/// `/dev/gpiomem` only exposes the Broadcom GPIO block, so any other SoC
/// configured with it is rejected before anything is mapped.
pub fn create_backend(soc: Soc, regions: &Arc<RegionManager>) -> Result<Box<dyn GpioBackend>> {
    if let MemorySource::GpioMem(path) = regions.source() {
        if !soc.is_broadcom() {
            return Err(Error::Config(format!(
                "{} only serves Broadcom GPIO, not {soc}",
                path.display()
            )));
        }
    }

    let backend: Box<dyn GpioBackend> = match soc {
        #[cfg(feature = "broadcom")]
        Soc::Bcm2835 | Soc::Bcm2836 | Soc::Bcm2837 | Soc::Bcm2711 => {
            Box::new(broadcom::BroadcomGpio::new(soc, Arc::clone(regions))?)
        }
        #[cfg(feature = "allwinner")]
        Soc::AllwinnerH3 | Soc::AllwinnerH5 | Soc::AllwinnerH6 | Soc::AllwinnerR8 => {
            Box::new(allwinner::AllwinnerGpio::new(soc, Arc::clone(regions))?)
        }
        #[cfg(feature = "amlogic")]
        Soc::AmlogicS905 | Soc::AmlogicS922X => {
            Box::new(amlogic::AmlogicGpio::new(soc, Arc::clone(regions))?)
        }
        #[cfg(feature = "rockchip")]
        Soc::Rk3288 => Box::new(rockchip::Rk3288Gpio::new(Arc::clone(regions))?),
        #[cfg(feature = "rockchip")]
        Soc::Rk3399 => Box::new(rockchip::Rk3399Gpio::new(Arc::clone(regions))?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(Error::NotFound(format!(
                "no register backend compiled in for {other}"
            )));
        }
    };
    log::info!("{} register backend initialised", backend.name());
    Ok(backend)
}

/// Map `len` bytes at each base, or nothing at all.
#[cfg_attr(
    not(any(feature = "allwinner", feature = "amlogic", feature = "rockchip")),
    allow(dead_code)
)]
pub(crate) fn map_windows(
    regions: &RegionManager,
    bases: impl IntoIterator<Item = u64>,
    len: usize,
) -> Result<Vec<RegisterWindow>> {
    let mut mapped = Vec::new();
    for base in bases {
        match regions.map(base, len) {
            Ok(window) => mapped.push(window),
            Err(err) => {
                for window in &mapped {
                    regions.unmap(window);
                }
                return Err(err);
            }
        }
    }
    Ok(mapped)
}
