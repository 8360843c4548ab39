//! Periodic re-evaluation of dynamic values.
//!
//! Every dynamic attribute of the layout owns a numbered slot. A
//! [`RefreshTask`] says how to compute the slot and how often; the
//! [`Scheduler`] decides when, and the [`Refresher`] runs due tasks on worker
//! threads and hands results back to the UI thread.

use crate::shell;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

pub type Slot = usize;

pub const MIN_INTERVAL: Duration = Duration::from_millis(250);

/// How an attribute value is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Literal(String),
    /// The whole attribute is one `${cmd}`.
    Command(String),
    /// Text with one or more embedded `${cmd}`.
    Template(String),
}

impl ValueSource {
    pub fn parse(raw: &str) -> Self {
        let t = raw.trim();
        if shell::is_command(t) && shell::matching_brace(t, 0) == Some(t.len() - 1) {
            ValueSource::Command(shell::command_of(t))
        } else if t.contains("${") {
            ValueSource::Template(t.to_string())
        } else {
            ValueSource::Literal(t.to_string())
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, ValueSource::Literal(_))
    }

    pub fn resolve(&self, timeout: Duration) -> String {
        match self {
            ValueSource::Literal(s) => s.clone(),
            ValueSource::Command(c) => shell::run_capture(c, timeout),
            ValueSource::Template(t) => shell::expand(t, timeout),
        }
    }
}

/// Parse a `refresh` attribute in seconds. `Some(None)` means "resolve once".
pub fn parse_interval(raw: &str) -> Option<Option<Duration>> {
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    if secs == 0.0 {
        return Some(None);
    }
    Some(Some(Duration::from_secs_f64(secs).max(MIN_INTERVAL)))
}

#[derive(Debug, Clone)]
pub struct RefreshTask {
    pub slot: Slot,
    pub source: ValueSource,
    /// `None` runs the task a single time.
    pub interval: Option<Duration>,
    pub next_due: Instant,
}

impl RefreshTask {
    pub fn new(slot: Slot, source: ValueSource, interval: Option<Duration>, first: Instant) -> Self {
        RefreshTask {
            slot,
            source,
            interval: interval.map(|i| i.max(MIN_INTERVAL)),
            next_due: first,
        }
    }
}

/// Hands out due tasks. A slot is never handed out again while its previous
/// run is still in flight.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<RefreshTask>,
    in_flight: HashSet<Slot>,
}

impl Scheduler {
    pub fn new(tasks: Vec<RefreshTask>) -> Self {
        Scheduler {
            tasks,
            in_flight: HashSet::new(),
        }
    }

    pub fn due(&mut self, now: Instant) -> Vec<(Slot, ValueSource)> {
        let mut out = Vec::new();
        let in_flight = &mut self.in_flight;
        self.tasks.retain_mut(|task| {
            if task.next_due > now || in_flight.contains(&task.slot) {
                return true;
            }
            in_flight.insert(task.slot);
            out.push((task.slot, task.source.clone()));
            match task.interval {
                Some(iv) => {
                    task.next_due = now + iv;
                    true
                }
                None => false,
            }
        });
        out
    }

    pub fn complete(&mut self, slot: Slot) {
        self.in_flight.remove(&slot);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub slot: Slot,
    pub value: String,
}

/// Runs scheduled tasks on worker threads.
pub struct Refresher {
    scheduler: Scheduler,
    timeout: Duration,
    tx: Sender<Update>,
    rx: Receiver<Update>,
}

impl Refresher {
    pub fn new(tasks: Vec<RefreshTask>, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Refresher {
            scheduler: Scheduler::new(tasks),
            timeout,
            tx,
            rx,
        }
    }

    /// Start every task due at `now`.
    pub fn pump(&mut self, now: Instant) {
        for (slot, source) in self.scheduler.due(now) {
            let tx = self.tx.clone();
            let timeout = self.timeout;
            let spawned = std::thread::Builder::new()
                .name(format!("refresh-{slot}"))
                .spawn(move || {
                    let value = source.resolve(timeout);
                    let _ = tx.send(Update { slot, value });
                });
            if let Err(e) = spawned {
                warn!("could not start refresh thread: {}", e);
                self.scheduler.complete(slot);
            }
        }
    }

    /// Results that arrived since the last call.
    pub fn drain(&mut self) -> Vec<Update> {
        let updates: Vec<Update> = self.rx.try_iter().collect();
        for u in &updates {
            trace!("slot {} <- {:?}", u.slot, u.value);
            self.scheduler.complete(u.slot);
        }
        updates
    }
}

/// Rate limit per key.
#[derive(Debug)]
pub struct Debouncer {
    min_interval: Duration,
    last: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(min_interval: Duration) -> Self {
        Debouncer {
            min_interval: min_interval.max(Duration::from_millis(1)),
            last: HashMap::new(),
        }
    }

    pub fn allow_at(&mut self, key: &str, now: Instant) -> bool {
        match self.last.get(key) {
            Some(prev) if now.saturating_duration_since(*prev) < self.min_interval => false,
            _ => {
                self.last.insert(key.to_string(), now);
                true
            }
        }
    }
}
