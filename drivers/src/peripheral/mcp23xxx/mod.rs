//! Microchip MCP23008 / MCP23017 I/O expanders.
//!
//! The chip sits on a [`RegisterBus`] and exposes 8 or 16 extra digital pins.
//! Its interrupt outputs are wired to native inputs. When a line fires, the
//! dispatcher hands the raw edge to the expander, which reads the flag and
//! capture registers of the ports on that line and answers with the pins
//! that changed.
//!
//! The expander is a [`DependentFactory`]: the registry it was opened on shuts
//! it down as part of its own shutdown cascade.

mod registers;

pub use registers::{IoCon, PINS_PER_PORT, Register, Variant, flagged_edges};

use crate::device_manager::{DeviceStates, RecordId};
use crate::error::{Error, Result};
use crate::gpio::GpioDevice;
use crate::hal::bus::RegisterBus;
use crate::hal::gpio::DigitalPin;
use crate::hal::interrupt::{BindingId, InterruptDemux, PinEvent, RawEdge};
use crate::irq::DispatcherHandle;
use crate::registry::{DependentFactory, DeviceRegistry, InputConfig};
use common::{DeviceMode, PullUpDown, ResourceKey, ResourceKind, Trigger};
use core::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// How the chip's interrupt outputs are wired to native GPIOs.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum InterruptMode {
    /// Not wired. Inputs can be read but produce no events.
    #[default]
    Disabled,
    /// INTA on the given GPIO. Port B pins of an MCP23017 produce no events.
    PortA(u32),
    /// INTA and INTB on separate GPIOs.
    PortsAB(u32, u32),
    /// INTA and INTB tied together inside the chip, on one GPIO.
    Mirrored(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpanderConfig {
    pub variant: Variant,
    /// I2C bus number, used for the resource prefix.
    pub controller: u32,
    pub address: u16,
    pub interrupts: InterruptMode,
}

impl ExpanderConfig {
    pub fn new(variant: Variant, controller: u32, address: u16) -> Self {
        Self {
            variant,
            controller,
            address,
            interrupts: InterruptMode::Disabled,
        }
    }

    pub fn with_interrupts(mut self, interrupts: InterruptMode) -> Self {
        self.interrupts = interrupts;
        self
    }

    /// Native GPIOs and the ports each one reports for.
    fn lines(&self) -> Result<Vec<(u32, Range<usize>)>> {
        let ports = self.variant.ports();
        match self.interrupts {
            InterruptMode::Disabled => Ok(Vec::new()),
            InterruptMode::PortA(gpio) => Ok(vec![(gpio, 0..1)]),
            InterruptMode::Mirrored(gpio) => Ok(vec![(gpio, 0..ports)]),
            InterruptMode::PortsAB(a, b) if ports == 2 && a != b => Ok(vec![(a, 0..1), (b, 1..2)]),
            InterruptMode::PortsAB(..) => Err(Error::Config(format!(
                "{} cannot use separate INTA/INTB lines {:?}",
                self.variant.name(),
                self.interrupts
            ))),
        }
    }
}

/// Shadow copy of the per-port configuration registers.
#[derive(Debug, Copy, Clone, Default)]
struct PortState {
    iodir: u8,
    gppu: u8,
    gpinten: u8,
    defval: u8,
    intcon: u8,
}

#[derive(Debug, Clone)]
struct PinTracked {
    pin: u32,
    binding: Option<BindingId>,
    live: Arc<AtomicBool>,
}

struct Line {
    device: GpioDevice,
    binding: BindingId,
    ports: Range<usize>,
}

/// One MCP23xxx chip.
pub struct Mcp23xxx {
    variant: Variant,
    prefix: String,
    bus: Box<dyn RegisterBus>,
    /// Held for every bus transaction so shadow and chip never disagree.
    ports: Mutex<[PortState; 2]>,
    states: DeviceStates<PinTracked>,
    bindings: spin::Mutex<[Option<BindingId>; 16]>,
    lines: spin::Mutex<Vec<Line>>,
    /// Binding of each interrupt line, fixed at open.
    line_ports: Vec<(BindingId, Range<usize>)>,
    interrupts: InterruptMode,
    dispatcher: DispatcherHandle,
    default_debounce: Duration,
    shut_down: AtomicBool,
}

impl Mcp23xxx {
    /// Bring up the chip on `bus` and register it with `registry`.
    pub fn open(
        registry: &DeviceRegistry,
        config: ExpanderConfig,
        bus: Box<dyn RegisterBus>,
    ) -> Result<Arc<Self>> {
        let prefix = format!(
            "{}-{}-{}",
            config.variant.name(),
            config.controller,
            config.address
        );

        let mut lines = Vec::new();
        for (gpio, ports) in config.lines()? {
            let device = registry.provision_input(
                gpio,
                InputConfig::new()
                    .with_trigger(Trigger::Rising)
                    .with_debounce(Duration::ZERO),
            )?;
            let binding = device.binding().ok_or_else(|| {
                Error::Fatal(format!("interrupt line {} has no binding", device.key()))
            })?;
            lines.push(Line {
                device,
                binding,
                ports,
            });
        }

        let chip = Arc::new(Self {
            variant: config.variant,
            prefix,
            bus,
            ports: Mutex::new([PortState::default(); 2]),
            states: DeviceStates::new(),
            bindings: spin::Mutex::new([None; 16]),
            line_ports: lines.iter().map(|l| (l.binding, l.ports.clone())).collect(),
            lines: spin::Mutex::new(lines),
            interrupts: config.interrupts,
            dispatcher: registry.dispatcher(),
            default_debounce: registry.config().default_debounce,
            shut_down: AtomicBool::new(false),
        });
        chip.initialise()?;

        let demux: Weak<dyn InterruptDemux> = Arc::downgrade(&chip) as Weak<dyn InterruptDemux>;
        for &(binding, _) in &chip.line_ports {
            chip.dispatcher.route(binding, demux.clone());
        }
        registry.register_dependent(Arc::clone(&chip) as Arc<dyn DependentFactory>);
        log::info!("{} ready, interrupts {:?}", chip.prefix, chip.interrupts);
        Ok(chip)
    }

    /// Open the chip at `config.address` on `/dev/i2c-<config.controller>`.
    pub fn open_i2c(registry: &DeviceRegistry, config: ExpanderConfig) -> Result<Arc<Self>> {
        let bus = registry.provision_i2c(config.controller, config.address)?;
        Self::open(registry, config, Box::new(bus))
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_open(&self, pin: u32) -> bool {
        self.states.is_open(&self.key(pin))
    }

    fn key(&self, pin: u32) -> ResourceKey {
        ResourceKey::new(self.prefix.as_str(), ResourceKind::Gpio, 0, pin)
    }

    fn lock(&self) -> MutexGuard<'_, [PortState; 2]> {
        self.ports.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, register: Register, port: usize, value: u8) -> Result<()> {
        let address = self.variant.address(register, port);
        log::trace!("{}: {register:?}[{port}] ({address:#04x}) <- {value:#04x}", self.prefix);
        self.bus.write_byte(address, value)
    }

    fn read(&self, register: Register, port: usize) -> Result<u8> {
        self.bus.read_byte(self.variant.address(register, port))
    }

    fn initialise(&self) -> Result<()> {
        let mut ports = self.lock();

        let start = IoCon::from_bits_retain(self.read(Register::IoCon, 0)?);
        log::debug!("{}: power-on IOCON {:#04x}", self.prefix, start.bits());
        let mut iocon = start - (IoCon::BANK | IoCon::SEQOP | IoCon::ODR);
        match self.interrupts {
            InterruptMode::Disabled => {}
            InterruptMode::Mirrored(_) => iocon |= IoCon::MIRROR | IoCon::INTPOL,
            InterruptMode::PortA(_) | InterruptMode::PortsAB(..) => {
                iocon.remove(IoCon::MIRROR);
                iocon.insert(IoCon::INTPOL);
            }
        }
        if iocon != start {
            self.write(Register::IoCon, 0, iocon.bits())?;
        }

        for (port, state) in ports.iter_mut().enumerate().take(self.variant.ports()) {
            *state = PortState {
                iodir: 0xff,
                ..PortState::default()
            };
            self.write(Register::IoDir, port, state.iodir)?;
            self.write(Register::IPol, port, 0)?;
            self.write(Register::GpIntEn, port, 0)?;
            self.write(Register::DefVal, port, 0)?;
            self.write(Register::IntCon, port, 0)?;
            self.write(Register::GpPu, port, 0)?;
            self.write(Register::OLat, port, 0)?;
        }
        Ok(())
    }

    pub fn provision_input(self: &Arc<Self>, pin: u32, input: InputConfig) -> Result<ExpanderPin> {
        let window = input.debounce.unwrap_or(self.default_debounce);
        self.provision(pin, DeviceMode::DigitalInput, input.pull, |chip, key| {
            chip.configure_input(pin, input.pull, input.trigger)?;
            let binding = chip.dispatcher.bind(key.clone(), window);
            chip.bindings.lock()[pin as usize] = Some(binding);
            Ok(Some(binding))
        })
    }

    pub fn provision_output(self: &Arc<Self>, pin: u32, initial: bool) -> Result<ExpanderPin> {
        self.provision(pin, DeviceMode::DigitalOutput, PullUpDown::None, |chip, _| {
            chip.set_direction(pin, false)?;
            chip.write_pin(pin, initial)?;
            Ok(None)
        })
    }

    fn provision(
        self: &Arc<Self>,
        pin: u32,
        mode: DeviceMode,
        pull: PullUpDown,
        configure: impl FnOnce(&Self, &ResourceKey) -> Result<Option<BindingId>>,
    ) -> Result<ExpanderPin> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Fatal(format!("{} has been shut down", self.prefix)));
        }
        if pin >= self.variant.pins() {
            return Err(Error::NotFound(format!(
                "{} pin {pin}, must be 0..{}",
                self.prefix,
                self.variant.pins()
            )));
        }
        let key = self.key(pin);
        if pull == PullUpDown::PullDown {
            return Err(Error::UnsupportedPull {
                target: key.to_string(),
                pull,
            });
        }

        let reservation = self.states.reserve(&key)?;
        log::debug!("provisioning {key} as {mode}");
        let chip: &Self = self;
        let binding = configure(chip, &key)?;
        let live = Arc::new(AtomicBool::new(true));
        let tracked = PinTracked {
            pin,
            binding,
            live: Arc::clone(&live),
        };
        let id = reservation.commit(tracked.clone()).inspect_err(|_| self.teardown(&key, &tracked))?;
        Ok(ExpanderPin {
            chip: Arc::clone(self),
            key,
            id,
            pin,
            binding,
            live,
        })
    }

    fn configure_input(&self, pin: u32, pull: PullUpDown, trigger: Trigger) -> Result<()> {
        let (port, bit) = split(pin);
        let mut ports = self.lock();
        let state = &mut ports[port];

        state.iodir |= bit;
        self.write(Register::IoDir, port, state.iodir)?;
        if pull == PullUpDown::PullUp {
            state.gppu |= bit;
        } else {
            state.gppu &= !bit;
        }
        self.write(Register::GpPu, port, state.gppu)?;

        if trigger == Trigger::None {
            return Ok(());
        }
        if !self.line_ports.iter().any(|(_, ports)| ports.contains(&port)) {
            log::warn!(
                "{}: no interrupt line for pin {pin}, {trigger:?} edges will not be reported",
                self.prefix
            );
            return Ok(());
        }
        match trigger {
            Trigger::Rising => {
                state.defval &= !bit;
                state.intcon |= bit;
            }
            Trigger::Falling => {
                state.defval |= bit;
                state.intcon |= bit;
            }
            Trigger::Both | Trigger::None => state.intcon &= !bit,
        }
        state.gpinten |= bit;
        self.write(Register::DefVal, port, state.defval)?;
        self.write(Register::IntCon, port, state.intcon)?;
        self.write(Register::GpIntEn, port, state.gpinten)
    }

    fn set_direction(&self, pin: u32, input: bool) -> Result<()> {
        let (port, bit) = split(pin);
        let mut ports = self.lock();
        let state = &mut ports[port];
        if input {
            state.iodir |= bit;
        } else {
            state.iodir &= !bit;
        }
        self.write(Register::IoDir, port, state.iodir)
    }

    fn is_input(&self, pin: u32) -> bool {
        let (port, bit) = split(pin);
        self.lock()[port].iodir & bit != 0
    }

    fn read_pin(&self, pin: u32) -> Result<bool> {
        let (port, bit) = split(pin);
        let _ports = self.lock();
        Ok(self.read(Register::Gpio, port)? & bit != 0)
    }

    fn write_pin(&self, pin: u32, value: bool) -> Result<()> {
        let (port, bit) = split(pin);
        let _ports = self.lock();
        let latch = self.read(Register::OLat, port)?;
        let latch = if value { latch | bit } else { latch & !bit };
        self.write(Register::OLat, port, latch)
    }

    fn set_pull(&self, pin: u32, pull: PullUpDown) -> Result<()> {
        let (port, bit) = split(pin);
        let mut ports = self.lock();
        let state = &mut ports[port];
        match pull {
            PullUpDown::PullUp => state.gppu |= bit,
            PullUpDown::None => state.gppu &= !bit,
            PullUpDown::PullDown => {
                return Err(Error::UnsupportedPull {
                    target: self.key(pin).to_string(),
                    pull,
                });
            }
        }
        self.write(Register::GpPu, port, state.gppu)
    }

    fn close_pin(&self, key: &ResourceKey, id: RecordId) {
        let Some(tracked) = self.states.begin_close(key, id) else {
            log::debug!("{key} already released");
            return;
        };
        self.teardown(key, &tracked);
        self.states.finish_close(key, id);
    }

    /// Undo only this pin's bits. Failures are logged.
    fn teardown(&self, key: &ResourceKey, tracked: &PinTracked) {
        tracked.live.store(false, Ordering::Release);
        if let Some(binding) = tracked.binding {
            self.dispatcher.unbind(binding);
            self.bindings.lock()[tracked.pin as usize] = None;
        }

        let (port, bit) = split(tracked.pin);
        let mut ports = self.lock();
        let state = &mut ports[port];
        let steps = [
            (Register::GpIntEn, &mut state.gpinten, false),
            (Register::DefVal, &mut state.defval, false),
            (Register::IntCon, &mut state.intcon, false),
            (Register::GpPu, &mut state.gppu, false),
            (Register::IoDir, &mut state.iodir, true),
        ];
        for (register, shadow, set) in steps {
            let next = if set { *shadow | bit } else { *shadow & !bit };
            if next == *shadow {
                continue;
            }
            *shadow = next;
            if let Err(err) = self.write(register, port, next) {
                log::warn!("{key}: failed to reset {register:?}: {err}");
            }
        }
        log::debug!("{key} closed");
    }
}

/// Port index and bit mask of an expander pin.
fn split(pin: u32) -> (usize, u8) {
    ((pin / PINS_PER_PORT) as usize, 1 << (pin % PINS_PER_PORT))
}

impl InterruptDemux for Mcp23xxx {
    fn service(&self, edge: &RawEdge) -> Result<Vec<(BindingId, bool)>> {
        if !edge.value {
            return Ok(Vec::new());
        }
        let Some((_, ports)) = self.line_ports.iter().find(|(b, _)| *b == edge.binding) else {
            log::error!("{}: interrupt from unexpected {}", self.prefix, edge.binding);
            return Ok(Vec::new());
        };

        // Reading INTCAP clears a port's interrupt, so a line only touches
        // the ports it reports for.
        let count = self.variant.ports();
        let mut flags = [0u8; 2];
        let mut capture = [0u8; 2];
        {
            let _ports = self.lock();
            if ports.len() == count {
                // INTF for every port followed by INTCAP for every port.
                let mut buf = [0u8; 4];
                self.bus
                    .read_block(self.variant.address(Register::IntF, 0), &mut buf[..count * 2])?;
                flags[..count].copy_from_slice(&buf[..count]);
                capture[..count].copy_from_slice(&buf[count..count * 2]);
            } else {
                for port in ports.clone() {
                    flags[port] = self.read(Register::IntF, port)?;
                    capture[port] = self.read(Register::IntCap, port)?;
                }
            }
        }
        log::debug!(
            "{}: interrupt flags {:02x?} capture {:02x?}",
            self.prefix,
            &flags[..count],
            &capture[..count]
        );

        let bindings = self.bindings.lock();
        let mut edges = Vec::new();
        for port in ports.clone() {
            for (bit, value) in flagged_edges(flags[port], capture[port]) {
                let pin = port as u32 * PINS_PER_PORT + bit;
                match bindings[pin as usize] {
                    Some(binding) => edges.push((binding, value)),
                    None => log::trace!("{}: pin {pin} flagged but not open", self.prefix),
                }
            }
        }
        Ok(edges)
    }
}

impl DependentFactory for Mcp23xxx {
    fn name(&self) -> String {
        self.prefix.clone()
    }

    /// Close open pins, then release the interrupt lines.
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for (key, id, tracked) in self.states.begin_close_all() {
            self.teardown(&key, &tracked);
            self.states.finish_close(&key, id);
        }
        for line in self.lines.lock().drain(..) {
            line.device.close_quietly();
        }
        log::info!("{} shut down", self.prefix);
    }
}

impl fmt::Debug for Mcp23xxx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mcp23xxx")
            .field("prefix", &self.prefix)
            .field("interrupts", &self.interrupts)
            .field("open", &self.states.len())
            .finish()
    }
}

/// A pin on an expander.
pub struct ExpanderPin {
    chip: Arc<Mcp23xxx>,
    key: ResourceKey,
    id: RecordId,
    pin: u32,
    binding: Option<BindingId>,
    live: Arc<AtomicBool>,
}

impl ExpanderPin {
    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn check(&self) -> Result<&Mcp23xxx> {
        if !self.live.load(Ordering::Acquire) {
            return Err(Error::NotFound(format!("{} is closed", self.key)));
        }
        Ok(&self.chip)
    }
}

impl DigitalPin for ExpanderPin {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn mode(&self) -> Result<DeviceMode> {
        Ok(if self.check()?.is_input(self.pin) {
            DeviceMode::DigitalInput
        } else {
            DeviceMode::DigitalOutput
        })
    }

    fn set_mode(&self, mode: DeviceMode) -> Result<()> {
        let chip = self.check()?;
        match mode {
            DeviceMode::DigitalInput => chip.set_direction(self.pin, true),
            DeviceMode::DigitalOutput => chip.set_direction(self.pin, false),
            mode => Err(Error::UnsupportedMode {
                target: self.key.to_string(),
                mode,
            }),
        }
    }

    fn pull(&self) -> Result<PullUpDown> {
        let chip = self.check()?;
        let (port, bit) = split(self.pin);
        Ok(if chip.lock()[port].gppu & bit != 0 {
            PullUpDown::PullUp
        } else {
            PullUpDown::None
        })
    }

    fn set_pull(&self, pull: PullUpDown) -> Result<()> {
        self.check()?.set_pull(self.pin, pull)
    }

    fn read(&self) -> Result<bool> {
        self.check()?.read_pin(self.pin)
    }

    fn write(&self, value: bool) -> Result<()> {
        let chip = self.check()?;
        if chip.is_input(self.pin) {
            return Err(Error::UnsupportedMode {
                target: self.key.to_string(),
                mode: DeviceMode::DigitalInput,
            });
        }
        chip.write_pin(self.pin, value)
    }

    fn subscribe(&self) -> Result<Receiver<PinEvent>> {
        let chip = self.check()?;
        match self.binding {
            Some(binding) => Ok(chip.dispatcher.subscribe(binding)),
            None => Err(Error::UnsupportedMode {
                target: format!("events on {}", self.key),
                mode: DeviceMode::DigitalOutput,
            }),
        }
    }

    fn is_open(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            log::warn!("{} is already closed", self.key);
            return;
        }
        self.chip.close_pin(&self.key, self.id);
    }
}

impl fmt::Debug for ExpanderPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpanderPin")
            .field("key", &self.key)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for ExpanderPin {
    fn drop(&mut self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.chip.close_pin(&self.key, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::SimulatedMemory;
    use crate::{Config, Soc};
    use common::PinTable;

    /// MCP23017 register file with BANK = 0 auto-increment on block reads.
    /// Reading INTCAPA/B clears INTFA/B.
    #[derive(Default)]
    struct FakeBus {
        regs: Mutex<[u8; 0x16]>,
    }

    impl FakeBus {
        fn get(&self, reg: u8) -> u8 {
            let mut regs = self.regs.lock().unwrap();
            let value = regs[reg as usize];
            if reg == 0x10 || reg == 0x11 {
                regs[reg as usize - 2] = 0;
            }
            value
        }
        fn set(&self, reg: u8, value: u8) {
            self.regs.lock().unwrap()[reg as usize] = value;
        }
    }

    impl RegisterBus for Arc<FakeBus> {
        fn read_byte(&self, register: u8) -> Result<u8> {
            Ok(self.get(register))
        }
        fn write_byte(&self, register: u8, value: u8) -> Result<()> {
            self.set(register, value);
            Ok(())
        }
        fn read_block(&self, register: u8, buf: &mut [u8]) -> Result<()> {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = self.get(register + i as u8);
            }
            Ok(())
        }
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(
            Soc::Bcm2837,
            PinTable::digital(0..28),
            Config::simulated(SimulatedMemory::new()),
        )
        .unwrap()
    }

    fn open(
        registry: &DeviceRegistry,
        variant: Variant,
        interrupts: InterruptMode,
    ) -> (Arc<FakeBus>, Arc<Mcp23xxx>) {
        let bus = Arc::new(FakeBus::default());
        bus.set(variant.address(Register::IoCon, 0), IoCon::SEQOP.bits());
        let config = ExpanderConfig::new(variant, 1, 0x20).with_interrupts(interrupts);
        let chip = Mcp23xxx::open(registry, config, Box::new(Arc::clone(&bus))).unwrap();
        (bus, chip)
    }

    #[test]
    fn initialise_configures_iocon_and_inputs() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23017, InterruptMode::Mirrored(4));
        assert_eq!(chip.prefix(), "MCP23017-1-32");
        assert_eq!(bus.get(0x0a), (IoCon::MIRROR | IoCon::INTPOL).bits());
        assert_eq!(bus.get(0x00), 0xff);
        assert_eq!(bus.get(0x01), 0xff);
    }

    #[test]
    fn separate_lines_need_two_ports() {
        let registry = registry();
        let bus = Arc::new(FakeBus::default());
        let config = ExpanderConfig::new(Variant::Mcp23008, 1, 0x20)
            .with_interrupts(InterruptMode::PortsAB(4, 5));
        assert!(matches!(
            Mcp23xxx::open(&registry, config, Box::new(bus)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn trigger_programs_compare_registers() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23008, InterruptMode::PortA(4));

        let _rising = chip
            .provision_input(1, InputConfig::new().with_trigger(Trigger::Rising).with_pull(PullUpDown::PullUp))
            .unwrap();
        let _falling = chip
            .provision_input(2, InputConfig::new().with_trigger(Trigger::Falling))
            .unwrap();
        let _both = chip
            .provision_input(3, InputConfig::new().with_trigger(Trigger::Both))
            .unwrap();

        assert_eq!(bus.get(0x06), 0b0000_0010, "GPPU");
        assert_eq!(bus.get(0x03), 0b0000_0100, "DEFVAL");
        assert_eq!(bus.get(0x04), 0b0000_0110, "INTCON");
        assert_eq!(bus.get(0x02), 0b0000_1110, "GPINTEN");
    }

    #[test]
    fn output_writes_latch_and_rejects_input_writes() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23017, InterruptMode::Disabled);

        let out = chip.provision_output(9, true).unwrap();
        assert_eq!(bus.get(0x01), 0b1111_1101, "IODIRB");
        assert_eq!(bus.get(0x15), 0b0000_0010, "OLATB");
        out.write(false).unwrap();
        assert_eq!(bus.get(0x15), 0);

        let input = chip.provision_input(0, InputConfig::new()).unwrap();
        assert!(matches!(
            input.write(true),
            Err(Error::UnsupportedMode { .. })
        ));
        bus.set(0x12, 0b0000_0001);
        assert!(input.read().unwrap());
    }

    #[test]
    fn pull_down_is_unsupported() {
        let registry = registry();
        let (_bus, chip) = open(&registry, Variant::Mcp23008, InterruptMode::Disabled);
        assert!(matches!(
            chip.provision_input(0, InputConfig::new().with_pull(PullUpDown::PullDown)),
            Err(Error::UnsupportedPull { .. })
        ));
        assert!(!chip.is_open(0));
        assert!(matches!(
            chip.provision_output(8, false),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn close_clears_only_own_bits() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23008, InterruptMode::PortA(4));
        let a = chip
            .provision_input(0, InputConfig::new().with_trigger(Trigger::Falling).with_pull(PullUpDown::PullUp))
            .unwrap();
        let _b = chip
            .provision_input(1, InputConfig::new().with_trigger(Trigger::Falling).with_pull(PullUpDown::PullUp))
            .unwrap();

        a.close();
        a.close();
        assert_eq!(bus.get(0x02), 0b10, "GPINTEN");
        assert_eq!(bus.get(0x03), 0b10, "DEFVAL");
        assert_eq!(bus.get(0x06), 0b10, "GPPU");
        assert!(!chip.is_open(0));
        assert!(chip.is_open(1));
    }

    #[test]
    fn service_maps_flags_to_open_pins() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23017, InterruptMode::Mirrored(4));
        let p0 = chip.provision_input(0, InputConfig::new().with_trigger(Trigger::Both)).unwrap();
        let p2 = chip.provision_input(2, InputConfig::new().with_trigger(Trigger::Both)).unwrap();
        let p9 = chip.provision_input(9, InputConfig::new().with_trigger(Trigger::Both)).unwrap();

        bus.set(0x0e, 0b101);
        bus.set(0x0f, 0b10);
        bus.set(0x10, 0b001);
        bus.set(0x11, 0b10);

        let line = chip.line_ports[0].0;
        let edges = chip
            .service(&RawEdge {
                binding: line,
                value: true,
                timestamp: std::time::Instant::now(),
            })
            .unwrap();
        assert_eq!(
            edges,
            vec![
                (p0.binding.unwrap(), true),
                (p2.binding.unwrap(), false),
                (p9.binding.unwrap(), true)
            ]
        );
    }

    #[test]
    fn separate_lines_leave_other_port_pending() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23017, InterruptMode::PortsAB(4, 5));
        let p0 = chip.provision_input(0, InputConfig::new().with_trigger(Trigger::Both)).unwrap();
        let p9 = chip.provision_input(9, InputConfig::new().with_trigger(Trigger::Both)).unwrap();

        bus.set(0x0e, 0b1);
        bus.set(0x0f, 0b10);
        bus.set(0x10, 0b1);
        bus.set(0x11, 0b10);

        let edge = |binding| RawEdge {
            binding,
            value: true,
            timestamp: std::time::Instant::now(),
        };
        let line_a = chip.line_ports[0].0;
        let line_b = chip.line_ports[1].0;
        assert_eq!(chip.service(&edge(line_a)).unwrap(), vec![(p0.binding.unwrap(), true)]);
        assert_eq!(bus.get(0x0f), 0b10, "INTFB untouched by line A");
        assert_eq!(chip.service(&edge(line_b)).unwrap(), vec![(p9.binding.unwrap(), true)]);
    }

    #[test]
    fn registry_shutdown_resets_expander() {
        let registry = registry();
        let (bus, chip) = open(&registry, Variant::Mcp23008, InterruptMode::PortA(4));
        let pin = chip
            .provision_input(3, InputConfig::new().with_trigger(Trigger::Falling).with_pull(PullUpDown::PullUp))
            .unwrap();
        assert_eq!(bus.get(0x02), 0b1000);

        registry.shutdown();
        assert!(!pin.is_open());
        assert_eq!(bus.get(0x02), 0, "GPINTEN");
        assert_eq!(bus.get(0x06), 0, "GPPU");
        assert_eq!(bus.get(0x00), 0xff, "IODIR");
    }

    #[test]
    fn shutdown_closes_pins_and_lines() {
        let registry = registry();
        let (_bus, chip) = open(&registry, Variant::Mcp23008, InterruptMode::PortA(4));
        let pin = chip.provision_input(0, InputConfig::new()).unwrap();
        let line = ResourceKey::new(ResourceKey::NATIVE, ResourceKind::Gpio, 0, 4);
        assert!(registry.is_open(&line));

        chip.shutdown();
        chip.shutdown();
        assert!(!pin.is_open());
        assert!(!registry.is_open(&line));
        assert!(matches!(
            chip.provision_input(1, InputConfig::new()),
            Err(Error::Fatal(_))
        ));
    }
}
