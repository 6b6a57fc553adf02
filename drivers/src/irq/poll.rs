//! Level sampling for native inputs.
//!
//! Register-mapped GPIO has no interrupt delivery into user space, so edges
//! on native inputs are found by sampling the level register on a fixed
//! period and posting every accepted change to the dispatcher.

use super::dispatch::DispatcherHandle;
use crate::error::{Error, Result};
use crate::hal::gpio::GpioBackend;
use crate::hal::interrupt::{BindingId, RawEdge};
use common::Trigger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Command {
    Watch {
        gpio: u32,
        binding: BindingId,
        trigger: Trigger,
        initial: bool,
    },
    Unwatch {
        gpio: u32,
    },
    Shutdown,
}

struct Watched {
    binding: BindingId,
    trigger: Trigger,
    last: bool,
    failing: bool,
}

#[derive(Debug)]
pub struct LevelPoller {
    tx: Sender<Command>,
    thread: spin::Mutex<Option<JoinHandle<()>>>,
}

impl LevelPoller {
    pub fn spawn(
        backend: Arc<dyn GpioBackend>,
        dispatcher: DispatcherHandle,
        interval: Duration,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("sbcio-poll".into())
            .spawn(move || run(rx, backend, dispatcher, interval))
            .map_err(Error::Io)?;
        Ok(Self {
            tx,
            thread: spin::Mutex::new(Some(thread)),
        })
    }

    /// Start sampling `gpio`. `initial` is the level the pin had when it was
    /// configured, so the first sample does not count as an edge.
    pub fn watch(&self, gpio: u32, binding: BindingId, trigger: Trigger, initial: bool) {
        self.send(Command::Watch {
            gpio,
            binding,
            trigger,
            initial,
        });
    }

    pub fn unwatch(&self, gpio: u32) {
        self.send(Command::Unwatch { gpio });
    }

    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.send(Command::Shutdown);
        if thread.join().is_err() {
            log::error!("poller thread panicked");
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::debug!("poller stopped, command dropped");
        }
    }
}

impl Drop for LevelPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sample(backend: &dyn GpioBackend, dispatcher: &DispatcherHandle, pins: &mut BTreeMap<u32, Watched>) {
    for (&gpio, pin) in pins.iter_mut() {
        let value = match backend.read(gpio) {
            Ok(value) => value,
            Err(err) => {
                if !pin.failing {
                    log::warn!("{}: sampling GPIO {gpio} failed: {err}", backend.name());
                    pin.failing = true;
                }
                continue;
            }
        };
        pin.failing = false;
        if value == pin.last {
            continue;
        }
        pin.last = value;
        if pin.trigger.accepts(value) {
            dispatcher.post(RawEdge {
                binding: pin.binding,
                value,
                timestamp: Instant::now(),
            });
        }
    }
}

fn run(
    rx: Receiver<Command>,
    backend: Arc<dyn GpioBackend>,
    dispatcher: DispatcherHandle,
    interval: Duration,
) {
    let mut pins: BTreeMap<u32, Watched> = BTreeMap::new();
    let mut next_sample = Instant::now() + interval;

    loop {
        // Commands never push the next sample back, so a stream of them
        // cannot starve sampling.
        let command = if pins.is_empty() {
            match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        } else {
            match rx.recv_timeout(next_sample.saturating_duration_since(Instant::now())) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match command {
            Some(Command::Watch {
                gpio,
                binding,
                trigger,
                initial,
            }) => {
                log::debug!("polling GPIO {gpio} for {trigger:?} edges");
                if pins.is_empty() {
                    next_sample = Instant::now() + interval;
                }
                pins.insert(
                    gpio,
                    Watched {
                        binding,
                        trigger,
                        last: initial,
                        failing: false,
                    },
                );
            }
            Some(Command::Unwatch { gpio }) => {
                pins.remove(&gpio);
            }
            Some(Command::Shutdown) => break,
            None => {}
        }

        let now = Instant::now();
        if !pins.is_empty() && now >= next_sample {
            sample(backend.as_ref(), &dispatcher, &mut pins);
            next_sample += interval;
            if next_sample < now {
                next_sample = now + interval;
            }
        }
    }
}
