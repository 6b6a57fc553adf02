//! Interrupt dispatcher thread.
//!
//! All binding state lives on one notification thread. Application threads,
//! the level poller and expander factories talk to it only through a
//! [`DispatcherHandle`], so listener lists are never mutated concurrently.
//! Listeners own the receiving end of a channel; delivery is a non-blocking
//! send, so a slow listener never holds up other bindings.
//!
//! Routed edges are demultiplexed on this thread too. An expander's bus
//! transfer therefore delays every other binding's delivery by the length of
//! that transfer.

use super::debounce::{Debounced, Debouncer};
use crate::error::{Error, Result};
use crate::hal::interrupt::{BindingId, InterruptDemux, PinEvent, RawEdge};
use common::ResourceKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Command {
    Bind {
        id: BindingId,
        key: ResourceKey,
        window: Duration,
    },
    Subscribe {
        id: BindingId,
        listener: Sender<PinEvent>,
    },
    Route {
        id: BindingId,
        demux: Weak<dyn InterruptDemux>,
    },
    Unbind {
        id: BindingId,
    },
    Edge(RawEdge),
    Shutdown,
}

/// Cheap, cloneable sender side of a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl DispatcherHandle {
    /// Create a binding for `key`. It stays idle until a listener subscribes.
    pub fn bind(&self, key: ResourceKey, window: Duration) -> BindingId {
        let id = BindingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("{id} bound to {key} (debounce {window:?})");
        self.send(Command::Bind { id, key, window });
        id
    }

    pub fn subscribe(&self, id: BindingId) -> Receiver<PinEvent> {
        let (listener, events) = mpsc::channel();
        self.send(Command::Subscribe { id, listener });
        events
    }

    /// Send raw edges of `id` through `demux` instead of dispatching them.
    pub fn route(&self, id: BindingId, demux: Weak<dyn InterruptDemux>) {
        self.send(Command::Route { id, demux });
    }

    /// Remove a binding. A debounce period still in flight is discarded.
    pub fn unbind(&self, id: BindingId) {
        self.send(Command::Unbind { id });
    }

    pub fn post(&self, edge: RawEdge) {
        self.send(Command::Edge(edge));
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::debug!("dispatcher stopped, command dropped");
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Bind { id, key, .. } => write!(f, "Bind({id}, {key})"),
            Command::Subscribe { id, .. } => write!(f, "Subscribe({id})"),
            Command::Route { id, .. } => write!(f, "Route({id})"),
            Command::Unbind { id } => write!(f, "Unbind({id})"),
            Command::Edge(edge) => write!(f, "Edge({}, {})", edge.binding, edge.value),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Owner of the dispatcher thread.
#[derive(Debug)]
pub struct Dispatcher {
    handle: DispatcherHandle,
    thread: spin::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("sbcio-dispatch".into())
            .spawn(move || run(rx))
            .map_err(Error::Io)?;

        Ok(Self {
            handle: DispatcherHandle {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            thread: spin::Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Stop the thread and wait for it. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.handle.send(Command::Shutdown);
        if thread.join().is_err() {
            log::error!("dispatcher thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Binding {
    key: ResourceKey,
    debouncer: Debouncer,
    listeners: Vec<Sender<PinEvent>>,
    demux: Option<Weak<dyn InterruptDemux>>,
}

impl Binding {
    fn deliver(&mut self, event: Debounced) {
        let key = &self.key;
        let before = self.listeners.len();
        self.listeners.retain(|listener| {
            listener
                .send(PinEvent {
                    key: key.clone(),
                    value: event.value,
                    timestamp: event.timestamp,
                })
                .is_ok()
        });
        if self.listeners.len() < before {
            log::warn!("{key}: dropped {} disconnected listener(s)", before - self.listeners.len());
        }
        if self.listeners.is_empty() && self.demux.is_none() {
            self.debouncer.disarm();
        }
    }
}

fn feed(bindings: &mut HashMap<BindingId, Binding>, id: BindingId, value: bool, at: Instant) {
    let Some(binding) = bindings.get_mut(&id) else {
        log::trace!("edge for unknown {id} ignored");
        return;
    };
    if let Some(event) = binding.debouncer.edge(value, at) {
        binding.deliver(event);
    }
}

fn service(bindings: &mut HashMap<BindingId, Binding>, edge: RawEdge) {
    let Some(binding) = bindings.get(&edge.binding) else {
        log::trace!("edge for unknown {} ignored", edge.binding);
        return;
    };
    let Some(demux) = binding.demux.clone() else {
        feed(bindings, edge.binding, edge.value, edge.timestamp);
        return;
    };
    let key = binding.key.clone();
    let Some(demux) = demux.upgrade() else {
        log::debug!("{key}: demultiplexer gone, interrupt dropped");
        return;
    };

    match demux.service(&edge) {
        Ok(edges) => {
            log::trace!("{key}: interrupt produced {} edge(s)", edges.len());
            for (id, value) in edges {
                feed(bindings, id, value, edge.timestamp);
            }
        }
        Err(err) => log::error!("{key}: interrupt dropped: {err}"),
    }
}

fn flush_expired(bindings: &mut HashMap<BindingId, Binding>, now: Instant) {
    for binding in bindings.values_mut() {
        if let Some(event) = binding.debouncer.expire(now) {
            binding.deliver(event);
        }
    }
}

fn run(rx: Receiver<Command>) {
    let mut bindings: HashMap<BindingId, Binding> = HashMap::new();

    loop {
        flush_expired(&mut bindings, Instant::now());

        let next_deadline = bindings
            .values()
            .filter_map(|b| b.debouncer.deadline())
            .min();
        let command = match next_deadline {
            Some(deadline) => {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        log::trace!("dispatcher: {command:?}");
        match command {
            Command::Bind { id, key, window } => {
                bindings.insert(
                    id,
                    Binding {
                        key,
                        debouncer: Debouncer::new(window),
                        listeners: Vec::new(),
                        demux: None,
                    },
                );
            }
            Command::Subscribe { id, listener } => match bindings.get_mut(&id) {
                Some(binding) => {
                    binding.listeners.push(listener);
                    binding.debouncer.arm();
                }
                None => log::warn!("subscription to unknown {id} ignored"),
            },
            Command::Route { id, demux } => match bindings.get_mut(&id) {
                Some(binding) => {
                    binding.demux = Some(demux);
                    binding.debouncer.arm();
                }
                None => log::warn!("route for unknown {id} ignored"),
            },
            Command::Unbind { id } => {
                if let Some(binding) = bindings.remove(&id) {
                    log::debug!("{id} for {} unbound", binding.key);
                }
            }
            Command::Edge(edge) => service(&mut bindings, edge),
            Command::Shutdown => break,
        }
    }

    log::debug!("dispatcher stopped with {} binding(s)", bindings.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use common::ResourceKind;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(2);

    fn key(n: u32) -> ResourceKey {
        ResourceKey::new("Test", ResourceKind::Gpio, 0, n)
    }

    fn edge(binding: BindingId, value: bool, timestamp: Instant) -> RawEdge {
        RawEdge {
            binding,
            value,
            timestamp,
        }
    }

    #[test]
    fn unsubscribed_binding_drops_edges() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let id = handle.bind(key(1), Duration::ZERO);
        handle.post(edge(id, true, Instant::now()));
        let events = handle.subscribe(id);
        handle.post(edge(id, false, Instant::now()));

        let event = events.recv_timeout(WAIT).unwrap();
        assert!(!event.value);
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn every_listener_gets_each_event() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let id = handle.bind(key(2), Duration::ZERO);
        let a = handle.subscribe(id);
        let b = handle.subscribe(id);
        handle.post(edge(id, true, Instant::now()));

        assert_eq!(a.recv_timeout(WAIT).unwrap().key, key(2));
        assert!(b.recv_timeout(WAIT).unwrap().value);
    }

    #[test]
    fn debounced_burst_is_one_event() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let id = handle.bind(key(3), Duration::from_millis(40));
        let events = handle.subscribe(id);

        let t0 = Instant::now();
        handle.post(edge(id, true, t0));
        handle.post(edge(id, false, t0 + Duration::from_millis(5)));
        handle.post(edge(id, true, t0 + Duration::from_millis(10)));

        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event.timestamp, t0);
        assert!(event.value);
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        let t1 = Instant::now();
        handle.post(edge(id, false, t1));
        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event.timestamp, t1);
        assert!(!event.value);
    }

    #[test]
    fn unbind_cancels_pending_timer() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let id = handle.bind(key(4), Duration::from_millis(30));
        let events = handle.subscribe(id);
        handle.post(edge(id, true, Instant::now()));
        handle.unbind(id);

        // The binding, and with it the only sender, is gone.
        assert!(matches!(
            events.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    struct Fixed {
        edges: Mutex<Option<Result<Vec<(BindingId, bool)>>>>,
    }

    impl InterruptDemux for Fixed {
        fn service(&self, _edge: &RawEdge) -> Result<Vec<(BindingId, bool)>> {
            self.edges
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[test]
    fn demux_fans_out_to_pin_bindings() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let line = handle.bind(key(10), Duration::ZERO);
        let pin0 = handle.bind(key(0), Duration::ZERO);
        let pin2 = handle.bind(key(2), Duration::ZERO);
        let events0 = handle.subscribe(pin0);
        let events2 = handle.subscribe(pin2);

        let demux: Arc<dyn InterruptDemux> = Arc::new(Fixed {
            edges: Mutex::new(Some(Ok(vec![(pin0, true), (pin2, false)]))),
        });
        handle.route(line, Arc::downgrade(&demux));
        let t0 = Instant::now();
        handle.post(edge(line, true, t0));

        let e0 = events0.recv_timeout(WAIT).unwrap();
        let e2 = events2.recv_timeout(WAIT).unwrap();
        assert!(e0.value && !e2.value);
        assert_eq!(e0.timestamp, t0);
        assert_eq!(e2.key, key(2));
    }

    #[test]
    fn demux_error_drops_interrupt() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        let line = handle.bind(key(10), Duration::ZERO);
        let pin = handle.bind(key(1), Duration::ZERO);
        let events = handle.subscribe(pin);

        let demux = Arc::new(Fixed {
            edges: Mutex::new(Some(Err(Error::BackendError("bus timeout".into())))),
        });
        let weak: Weak<dyn InterruptDemux> = Arc::downgrade(&demux) as Weak<dyn InterruptDemux>;
        handle.route(line, weak);
        handle.post(edge(line, true, Instant::now()));
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

        // The next interrupt is serviced normally.
        *demux.edges.lock().unwrap() = Some(Ok(vec![(pin, true)]));
        handle.post(edge(line, true, Instant::now()));
        assert!(events.recv_timeout(WAIT).unwrap().value);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let handle = dispatcher.handle();
        dispatcher.shutdown();
        dispatcher.shutdown();
        handle.bind(key(1), Duration::ZERO);
    }
}
