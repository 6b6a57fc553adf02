//! Per-binding debounce state machine.
//!
//! `Idle -> Armed -> Debouncing -> Armed`. Raw edges are ignored while idle.
//! The first edge while armed opens a quiet period; every further edge moves
//! the end of that period to `edge + window` and replaces the pending value.
//! When the period ends one event is emitted with the first edge's timestamp
//! and the latest value. A zero window emits every edge as it arrives.

use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Debounced {
    pub value: bool,
    pub timestamp: Instant,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Armed,
    Debouncing {
        first: Instant,
        value: bool,
        deadline: Instant,
    },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: State,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: State::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn arm(&mut self) {
        if self.state == State::Idle {
            self.state = State::Armed;
        }
    }

    /// Back to idle. A pending burst is discarded.
    pub fn disarm(&mut self) {
        self.state = State::Idle;
    }

    pub fn is_armed(&self) -> bool {
        self.state != State::Idle
    }

    /// Feed a raw edge seen at `at`.
    pub fn edge(&mut self, value: bool, at: Instant) -> Option<Debounced> {
        match self.state {
            State::Idle => None,
            State::Armed if self.window.is_zero() => Some(Debounced {
                value,
                timestamp: at,
            }),
            State::Armed => {
                self.state = State::Debouncing {
                    first: at,
                    value,
                    deadline: at + self.window,
                };
                None
            }
            State::Debouncing { first, deadline, .. } => {
                self.state = State::Debouncing {
                    first,
                    value,
                    deadline: deadline.max(at + self.window),
                };
                None
            }
        }
    }

    /// When the pending burst, if any, should be flushed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Debouncing { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Flush the pending burst if its quiet period is over at `now`.
    pub fn expire(&mut self, now: Instant) -> Option<Debounced> {
        match self.state {
            State::Debouncing {
                first,
                value,
                deadline,
            } if now >= deadline => {
                self.state = State::Armed;
                Some(Debounced {
                    value,
                    timestamp: first,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(50);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn idle_ignores_edges() {
        let mut debouncer = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(debouncer.edge(true, t0), None);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn burst_collapses_to_first_timestamp_and_last_value() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm();
        let t0 = Instant::now();

        assert_eq!(debouncer.edge(true, t0), None);
        assert_eq!(debouncer.edge(false, t0 + ms(10)), None);
        assert_eq!(debouncer.edge(true, t0 + ms(20)), None);
        assert_eq!(debouncer.deadline(), Some(t0 + ms(70)));

        assert_eq!(debouncer.expire(t0 + ms(60)), None);
        assert_eq!(
            debouncer.expire(t0 + ms(70)),
            Some(Debounced {
                value: true,
                timestamp: t0
            })
        );
        assert_eq!(debouncer.expire(t0 + ms(500)), None);
    }

    #[test]
    fn edge_after_window_starts_new_burst() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm();
        let t0 = Instant::now();

        debouncer.edge(true, t0);
        let first = debouncer.expire(t0 + ms(50)).unwrap();
        debouncer.edge(false, t0 + ms(200));
        let second = debouncer.expire(t0 + ms(250)).unwrap();

        assert_eq!(first.timestamp, t0);
        assert_eq!(second.timestamp, t0 + ms(200));
        assert!(!second.value);
    }

    #[test]
    fn zero_window_passes_edges_through() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        debouncer.arm();
        let t0 = Instant::now();
        assert_eq!(debouncer.edge(true, t0).map(|e| e.value), Some(true));
        assert_eq!(debouncer.edge(false, t0).map(|e| e.value), Some(false));
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn disarm_drops_pending_burst() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm();
        let t0 = Instant::now();
        debouncer.edge(true, t0);
        debouncer.disarm();
        assert_eq!(debouncer.expire(t0 + ms(100)), None);
        assert!(!debouncer.is_armed());
    }
}
