//! Per-key event sequencing.
//!
//! Operations on the same logical resource (for example create-then-delete of
//! one appliance) must never be reordered or run concurrently, while
//! unrelated resources must not block each other. The [`EventSequencer`]
//! keeps one FIFO queue per key and admits at most one event per key at a
//! time.
//!
//! # Per-key State Machine
//!
//! ```text
//!   EMPTY ──run()──> SCHEDULED ──release()──> EMPTY ──run()──> (key dropped)
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use log::{debug, trace};

/// Identifier of an event, unique within one orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ev-{}", self.0)
    }
}

/// A unit of work posted to the sequencer.
#[derive(Debug, Clone)]
pub struct Event<P> {
    /// Event identifier
    pub id: EventId,
    /// Key grouping events that must not run concurrently
    pub key: String,
    /// Event payload
    pub payload: P,
    /// Set once the event has passed through [`EventSequencer::sequence`]
    pub sequenced: bool,
}

impl<P> Event<P> {
    /// Creates a new, not yet sequenced event.
    pub fn new(id: EventId, key: impl Into<String>, payload: P) -> Self {
        Self {
            id,
            key: key.into(),
            payload,
            sequenced: false,
        }
    }
}

/// Result of the per-key admission check.
#[derive(Debug)]
pub enum Admission<P> {
    /// The head of the queue was promoted and handed to the caller
    Scheduled(Event<P>),
    /// An event is already scheduled for this key
    Busy,
    /// Nothing scheduled and nothing pending
    Empty,
}

/// Queue state for one key.
#[derive(Debug)]
struct KeyQueue<P> {
    pending: VecDeque<Event<P>>,
    scheduled: Option<EventId>,
}

impl<P> KeyQueue<P> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            scheduled: None,
        }
    }

    fn admit(&mut self) -> Admission<P> {
        if self.scheduled.is_some() {
            return Admission::Busy;
        }
        match self.pending.pop_front() {
            Some(event) => {
                self.scheduled = Some(event.id);
                Admission::Scheduled(event)
            }
            None => Admission::Empty,
        }
    }
}

/// Per-key FIFO sequencer.
///
/// The scheduled slot of a key records the id of the admitted event; the
/// event itself is owned by whoever received it from [`run`](Self::run) and
/// must be handed back through [`release`](Self::release) once processed.
///
/// Keys are iterated in sorted order, so a single `run()` admits events in a
/// deterministic order across keys.
pub struct EventSequencer<P> {
    queues: BTreeMap<String, KeyQueue<P>>,
}

impl<P> EventSequencer<P> {
    /// Creates an empty sequencer.
    pub fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
        }
    }

    /// Appends `event` to the pending queue of `key`.
    ///
    /// Never blocks and never admits the event by itself.
    pub fn sequence(&mut self, key: &str, mut event: Event<P>) {
        event.key = key.to_string();
        event.sequenced = true;
        trace!("sequencer: queued {} on {}", event.id, key);
        self.queues
            .entry(key.to_string())
            .or_insert_with(KeyQueue::new)
            .pending
            .push_back(event);
    }

    /// Runs the admission check for a single key.
    ///
    /// Untracked keys report [`Admission::Empty`].
    pub fn admit(&mut self, key: &str) -> Admission<P> {
        match self.queues.get_mut(key) {
            Some(queue) => queue.admit(),
            None => Admission::Empty,
        }
    }

    /// Promotes the head of every idle key's queue and returns the newly
    /// scheduled events.
    ///
    /// Keys with nothing scheduled and nothing pending are dropped.
    pub fn run(&mut self) -> Vec<Event<P>> {
        let mut scheduled = Vec::new();
        let mut drained = Vec::new();

        for (key, queue) in self.queues.iter_mut() {
            match queue.admit() {
                Admission::Scheduled(event) => {
                    debug!("sequencer: scheduled {} on {}", event.id, key);
                    scheduled.push(event);
                }
                Admission::Busy => {}
                Admission::Empty => drained.push(key.clone()),
            }
        }

        for key in drained {
            self.queues.remove(&key);
        }

        scheduled
    }

    /// Releases the scheduled slot of `key` if it currently holds `event`.
    ///
    /// A stale or mismatched release leaves the state untouched. Returns true
    /// if the slot was cleared.
    pub fn release(&mut self, key: &str, event: &Event<P>) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            trace!("sequencer: release of {} on untracked key {}", event.id, key);
            return false;
        };
        if queue.scheduled == Some(event.id) {
            queue.scheduled = None;
            debug!("sequencer: released {} on {}", event.id, key);
            true
        } else {
            trace!("sequencer: ignored stale release of {} on {}", event.id, key);
            false
        }
    }

    /// Returns true if an event is scheduled for `key`.
    pub fn is_scheduled(&self, key: &str) -> bool {
        self.queues
            .get(key)
            .map(|q| q.scheduled.is_some())
            .unwrap_or(false)
    }

    /// Returns the id of the scheduled event for `key`, if any.
    pub fn scheduled_event(&self, key: &str) -> Option<EventId> {
        self.queues.get(key).and_then(|q| q.scheduled)
    }

    /// Returns the number of pending (not yet scheduled) events.
    pub fn pending_count(&self) -> usize {
        self.queues.values().map(|q| q.pending.len()).sum()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Returns the keys currently tracked.
    pub fn tracked_keys(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(|k| k.as_str())
    }

    /// Dumps the sequencer state for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.queues
            .iter()
            .map(|(key, queue)| {
                let scheduled = queue
                    .scheduled
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let pending: Vec<String> = queue.pending.iter().map(|e| e.id.to_string()).collect();
                format!("{}: scheduled={} pending=[{}]", key, scheduled, pending.join(","))
            })
            .collect()
    }
}

impl<P> Default for EventSequencer<P> {
    fn default() -> Self {
        Self::new()
    }
}
