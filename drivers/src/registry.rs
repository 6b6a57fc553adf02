//! Device registry
//!
//! The provisioning entry point. A [`DeviceRegistry`] is built once per
//! board from the detected [`Soc`] and its [`PinTable`], and every driver
//! provisions its pins and buses through it. The register backend, region
//! manager and level poller are started on the first provisioning call.
//!
//! # Example
//!
//! ```no_run
//! use sbcio_drivers::{Config, DeviceRegistry, DigitalPin, InputConfig, PinTable, Soc, Trigger};
//!
//! let registry = DeviceRegistry::new(Soc::Bcm2837, PinTable::digital(0..54), Config::from_env()?)?;
//! let led = registry.provision_output(17, false)?;
//! let button = registry.provision_input(4, InputConfig::new().with_trigger(Trigger::Falling))?;
//! let presses = button.subscribe()?;
//! led.write(true)?;
//! # drop(presses);
//! registry.shutdown();
//! # Ok::<(), sbcio_drivers::Error>(())
//! ```

use crate::config::Config;
use crate::device_manager::{DeviceStates, RecordId, Reservation};
use crate::error::{Error, Result};
use crate::gpio::GpioDevice;
use crate::hal::gpio::GpioBackend;
use crate::hal::interrupt::BindingId;
use crate::i2c::{self, I2cDevice};
use crate::irq::{Dispatcher, DispatcherHandle, LevelPoller};
use crate::mmio::RegionManager;
use crate::platform::{self, Soc};
use common::{DeviceMode, PinTable, PullUpDown, ResourceKey, Trigger};
use core::fmt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A factory whose devices sit on top of registry resources, such as an I/O
/// expander driven over an I2C bus.
///
/// Registered factories are shut down by [`DeviceRegistry::shutdown`] after
/// the registry's own devices and before the register windows go away.
pub trait DependentFactory: Send + Sync {
    fn name(&self) -> String;

    /// Release every device the factory provisioned. Must tolerate being
    /// called more than once.
    fn shutdown(&self);
}

/// Slot of a dependent factory in its registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FactoryId(usize);

/// Input pin options.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct InputConfig {
    pub pull: PullUpDown,
    /// Edges that produce events. `Trigger::None` disables edge detection.
    pub trigger: Trigger,
    /// Debounce window. `None` uses [`Config::default_debounce`].
    pub debounce: Option<Duration>,
}

impl InputConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pull(mut self, pull: PullUpDown) -> Self {
        self.pull = pull;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }
}

#[derive(Clone)]
pub(crate) enum TrackedKind {
    Gpio {
        gpio: u32,
        binding: Option<BindingId>,
        watched: bool,
    },
    I2c {
        file: Arc<Mutex<Option<File>>>,
    },
}

/// What the registry needs to tear a record down without its handle.
#[derive(Clone)]
pub(crate) struct Tracked {
    pub(crate) live: Arc<AtomicBool>,
    pub(crate) kind: TrackedKind,
}

pub(crate) struct Engine {
    regions: Arc<RegionManager>,
    pub(crate) backend: Arc<dyn GpioBackend>,
    poller: LevelPoller,
}

impl Engine {
    /// Back to an input with pulls off. Failures are logged.
    fn reset_pin(&self, key: &ResourceKey, gpio: u32) {
        if let Err(err) = self.backend.set_mode(gpio, DeviceMode::DigitalInput) {
            log::warn!("{key}: failed to reset to input: {err}");
        }
        if let Err(err) = self.backend.set_pull(gpio, PullUpDown::None) {
            log::warn!("{key}: failed to disable pull: {err}");
        }
    }
}

/// State shared by the registry and every handle it gives out.
///
/// Handles keep this alive; it never points back at dependent factories.
pub(crate) struct Shared {
    soc: Soc,
    pins: PinTable,
    config: Config,
    states: DeviceStates<Tracked>,
    engine: spin::Once<Engine>,
    dispatcher: Dispatcher,
    shut_down: AtomicBool,
}

impl Shared {
    /// The running engine, started on first use.
    ///
    /// A failed start leaves nothing behind, so the next call tries again.
    fn start(&self) -> Result<&Engine> {
        self.engine.try_call_once(|| {
            let regions = Arc::new(RegionManager::new(self.config.memory.clone()));
            let backend: Arc<dyn GpioBackend> =
                Arc::from(platform::create_backend(self.soc, &regions)?);
            let poller = match LevelPoller::spawn(
                Arc::clone(&backend),
                self.dispatcher.handle(),
                self.config.poll_interval,
            ) {
                Ok(poller) => poller,
                Err(err) => {
                    backend.release();
                    return Err(err);
                }
            };
            Ok(Engine {
                regions,
                backend,
                poller,
            })
        })
    }

    /// The engine of an already provisioned device.
    pub(crate) fn engine(&self) -> Result<&Engine> {
        self.engine
            .get()
            .ok_or_else(|| Error::Fatal("register backend not initialised".into()))
    }

    pub(crate) fn dispatcher(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Fatal(format!("{} registry has been shut down", self.soc)));
        }
        Ok(())
    }

    /// Tear down the record opened as `id`, if it is still open.
    pub(crate) fn close(&self, key: &ResourceKey, id: RecordId) {
        let Some(tracked) = self.states.begin_close(key, id) else {
            log::debug!("{key} already released");
            return;
        };
        self.teardown(key, &tracked);
        self.states.finish_close(key, id);
    }

    /// Commit a provisioned record, undoing the setup if the registry was
    /// shut down in the meantime.
    fn publish(&self, key: &ResourceKey, reservation: Reservation<'_, Tracked>, tracked: Tracked) -> Result<RecordId> {
        reservation.commit(tracked.clone()).inspect_err(|_| {
            log::debug!("{key} provisioned during shutdown, releasing");
            self.teardown(key, &tracked);
        })
    }

    /// Best effort. Failures are logged so one device cannot stop a cascade.
    fn teardown(&self, key: &ResourceKey, tracked: &Tracked) {
        tracked.live.store(false, Ordering::Release);
        match &tracked.kind {
            TrackedKind::Gpio {
                gpio,
                binding,
                watched,
            } => {
                if let Some(binding) = binding {
                    self.dispatcher.handle().unbind(*binding);
                }
                if let Some(engine) = self.engine.get() {
                    if *watched {
                        engine.poller.unwatch(*gpio);
                    }
                    engine.reset_pin(key, *gpio);
                }
            }
            TrackedKind::I2c { file } => {
                let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                file.take();
            }
        }
        log::debug!("{key} closed");
    }
}

pub struct DeviceRegistry {
    shared: Arc<Shared>,
    dependents: spin::Mutex<Vec<Option<Arc<dyn DependentFactory>>>>,
}

impl DeviceRegistry {
    /// Build a registry for the board described by `soc` and `pins`.
    ///
    /// Only the dispatcher thread starts here. No register memory is mapped
    /// until the first pin is provisioned.
    pub fn new(soc: Soc, pins: PinTable, config: Config) -> Result<Self> {
        let dispatcher = Dispatcher::spawn()?;
        log::info!("{soc} registry created with {} pin(s)", pins.len());
        Ok(Self {
            shared: Arc::new(Shared {
                soc,
                pins,
                config,
                states: DeviceStates::new(),
                engine: spin::Once::new(),
                dispatcher,
                shut_down: AtomicBool::new(false),
            }),
            dependents: spin::Mutex::new(Vec::new()),
        })
    }

    pub fn soc(&self) -> Soc {
        self.shared.soc
    }

    pub fn pins(&self) -> &PinTable {
        &self.shared.pins
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn dispatcher(&self) -> DispatcherHandle {
        self.shared.dispatcher()
    }

    /// Provision `gpio` in `mode`.
    ///
    /// Inputs get the default [`InputConfig`]. Outputs are driven to
    /// `initial`, low when `None`. Other modes only route the pin.
    pub fn provision(&self, gpio: u32, mode: DeviceMode, initial: Option<bool>) -> Result<GpioDevice> {
        match mode {
            DeviceMode::DigitalInput => self.provision_input(gpio, InputConfig::default()),
            DeviceMode::DigitalOutput => self.provision_output(gpio, initial.unwrap_or(false)),
            mode => self.provision_pin(gpio, mode, |_, _| Ok((None, false))),
        }
    }

    pub fn provision_input(&self, gpio: u32, input: InputConfig) -> Result<GpioDevice> {
        let window = input
            .debounce
            .unwrap_or(self.shared.config.default_debounce);
        self.provision_pin(gpio, DeviceMode::DigitalInput, |engine, key| {
            engine.backend.set_pull(gpio, input.pull)?;
            let binding = self.shared.dispatcher.handle().bind(key.clone(), window);
            if input.trigger == Trigger::None {
                return Ok((Some(binding), false));
            }
            match engine.backend.read(gpio) {
                Ok(level) => {
                    engine.poller.watch(gpio, binding, input.trigger, level);
                    Ok((Some(binding), true))
                }
                Err(err) => {
                    self.shared.dispatcher.handle().unbind(binding);
                    Err(err)
                }
            }
        })
    }

    pub fn provision_output(&self, gpio: u32, initial: bool) -> Result<GpioDevice> {
        self.provision_pin(gpio, DeviceMode::DigitalOutput, |engine, _| {
            engine.backend.write(gpio, initial)?;
            Ok((None, false))
        })
    }

    fn provision_pin(
        &self,
        gpio: u32,
        mode: DeviceMode,
        configure: impl FnOnce(&Engine, &ResourceKey) -> Result<(Option<BindingId>, bool)>,
    ) -> Result<GpioDevice> {
        let shared = &self.shared;
        shared.ensure_running()?;

        let descriptor = shared.pins.lookup(gpio)?;
        let key = ResourceKey::gpio(ResourceKey::NATIVE, descriptor);
        if !shared.pins.supports(descriptor, mode) {
            return Err(Error::UnsupportedMode {
                target: key.to_string(),
                mode,
            });
        }

        let reservation = shared.states.reserve(&key)?;
        let engine = shared.start()?;
        log::debug!("provisioning {key} ({}) as {mode}", descriptor.name);
        engine.backend.set_mode(gpio, mode)?;
        let (binding, watched) = configure(engine, &key).inspect_err(|err| {
            log::debug!("configuring {key} failed: {err}");
            engine.reset_pin(&key, gpio);
        })?;

        let live = Arc::new(AtomicBool::new(true));
        let tracked = Tracked {
            live: Arc::clone(&live),
            kind: TrackedKind::Gpio {
                gpio,
                binding,
                watched,
            },
        };
        let id = shared.publish(&key, reservation, tracked)?;
        Ok(GpioDevice::new(
            Arc::clone(shared),
            Arc::clone(descriptor),
            key,
            id,
            mode,
            binding,
            watched,
            live,
        ))
    }

    /// Claim the I2C device at `address` on bus `controller`.
    pub fn provision_i2c(&self, controller: u32, address: u16) -> Result<I2cDevice> {
        let shared = &self.shared;
        shared.ensure_running()?;

        let key = ResourceKey::i2c(ResourceKey::NATIVE, controller, address);
        let reservation = shared.states.reserve(&key)?;
        let file = i2c::open_bus(&shared.config.i2c_dev_dir, controller, address)?;
        log::debug!("provisioned {key}");

        let live = Arc::new(AtomicBool::new(true));
        let file = Arc::new(Mutex::new(Some(file)));
        let tracked = Tracked {
            live: Arc::clone(&live),
            kind: TrackedKind::I2c {
                file: Arc::clone(&file),
            },
        };
        let id = shared.publish(&key, reservation, tracked)?;
        Ok(I2cDevice::new(Arc::clone(shared), key, id, live, file))
    }

    /// Add a factory to the shutdown cascade.
    pub fn register_dependent(&self, factory: Arc<dyn DependentFactory>) -> FactoryId {
        let mut dependents = self.dependents.lock();
        log::debug!("registered dependent factory {}", factory.name());
        dependents.push(Some(factory));
        FactoryId(dependents.len() - 1)
    }

    /// Remove a factory that shut itself down early.
    pub fn unregister_dependent(&self, id: FactoryId) -> Option<Arc<dyn DependentFactory>> {
        self.dependents.lock().get_mut(id.0).and_then(Option::take)
    }

    pub fn is_open(&self, key: &ResourceKey) -> bool {
        self.shared.states.is_open(key)
    }

    pub fn open_keys(&self) -> Vec<ResourceKey> {
        self.shared.states.open_keys()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Close everything.
    ///
    /// Own devices first, then dependent factories in registration order,
    /// then the event threads, and finally the register windows. Safe to
    /// call more than once.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.shut_down.swap(true, Ordering::AcqRel) {
            log::debug!("{} registry already shut down", shared.soc);
            return;
        }
        log::info!("shutting down {} registry", shared.soc);

        for (key, id, tracked) in shared.states.begin_close_all() {
            shared.teardown(&key, &tracked);
            shared.states.finish_close(&key, id);
        }
        // In-flight provisioning may still be starting the engine.
        shared.states.wait_until_empty();

        let dependents: Vec<_> = self
            .dependents
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for factory in dependents {
            log::debug!("shutting down dependent factory {}", factory.name());
            factory.shutdown();
        }

        if let Some(engine) = shared.engine.get() {
            engine.poller.shutdown();
        }
        shared.dispatcher.shutdown();
        if let Some(engine) = shared.engine.get() {
            engine.backend.release();
            engine.regions.close();
        }
        log::info!("{} registry shut down", shared.soc);
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("soc", &self.shared.soc)
            .field("open", &self.shared.states.len())
            .field("dependents", &self.dependents.lock().iter().flatten().count())
            .finish()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
