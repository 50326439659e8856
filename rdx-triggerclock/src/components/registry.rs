//! Resolves event-based triggers against per-source occurrence counters.
//!
//! Occurrences carry 1-based labels: the k-th notification of a source is
//! occurrence `k`, and afterwards the source's count is `k`. A registration
//! resolves its target label from the count it observes, then is queued for a
//! future occurrence, replayed against the most recent one, or dropped. Only
//! the most recent occurrence's timestamp is remembered.
//!
//! The registry never calls into the timer engine. Both mutations return
//! what has to be armed or fired, and the caller does so after the lock is
//! released.

use super::{lock, Callback};
use crate::common::EventSource;
use crate::time::{shift_by_nanos, CountOrigin, EventBasedTime};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, trace};

/// A callback waiting for a future occurrence.
struct PendingEntry {
    time_shift_ns: i64,
    callback: Callback,
}

/// Counter, last timestamp and waiting callbacks of one event source.
#[derive(Default)]
struct EventSourceState {
    occurrence_count: u64,
    last_occurrence: Option<DateTime<Utc>>,
    /// Keyed by target occurrence label.
    pending: BTreeMap<u64, Vec<PendingEntry>>,
}

/// The outcome of registering an event-based trigger.
pub enum Resolution {
    /// Waiting for occurrence `target_count`.
    Queued { target_count: u64 },
    /// The target is the most recent occurrence; arm `callback` at `deadline`.
    Replay {
        target_count: u64,
        deadline: DateTime<Utc>,
        callback: Callback,
    },
    /// The target is older than the most recent occurrence, or would fall
    /// before the first one. The callback was discarded.
    Dropped {
        target_count: Option<u64>,
        occurrence_count: u64,
    },
}

/// Work released by an occurrence.
pub enum Dispatch {
    FireNow(Callback),
    ArmAt(DateTime<Utc>, Callback),
}

/// The result of recording one occurrence.
pub struct Occurrence {
    /// The occurrence's label, which is also the source's new count.
    pub count: u64,
    pub timestamp: DateTime<Utc>,
    pub dispatches: Vec<Dispatch>,
}

/// Per-source event state behind a single mutex.
#[derive(Default)]
pub struct EventRegistry {
    sources: Mutex<HashMap<EventSource, EventSourceState>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `time` against the source's current count and queues,
    /// replays, or drops `callback`.
    ///
    /// Unknown sources are created with a count of zero.
    pub fn register(&self, time: &EventBasedTime, callback: Callback) -> Resolution {
        let mut sources = lock(&self.sources);
        let state = sources.entry(time.source).or_default();
        let current = state.occurrence_count;

        let Some(target_count) = target_count(current, time.origin, time.count) else {
            debug!(source = %time.source, current, "Event target precedes the first occurrence; dropped.");
            return Resolution::Dropped {
                target_count: None,
                occurrence_count: current,
            };
        };

        // Nothing has happened yet, so a target at the current count is the
        // first occurrence.
        let target_count = match state.last_occurrence {
            None if target_count == current => current + 1,
            _ => target_count,
        };

        if target_count > current {
            trace!(source = %time.source, target_count, current, "Queued for a future occurrence.");
            state
                .pending
                .entry(target_count)
                .or_default()
                .push(PendingEntry {
                    time_shift_ns: time.time_shift_ns,
                    callback,
                });
            return Resolution::Queued { target_count };
        }

        match state.last_occurrence {
            Some(last) if target_count == current => {
                trace!(source = %time.source, target_count, "Target already happened; replaying.");
                Resolution::Replay {
                    target_count,
                    deadline: shift_by_nanos(last, time.time_shift_ns),
                    callback,
                }
            }
            _ => {
                debug!(source = %time.source, target_count, current, "Event target is out of history; dropped.");
                Resolution::Dropped {
                    target_count: Some(target_count),
                    occurrence_count: current,
                }
            }
        }
    }

    /// Records an occurrence of `source` now.
    pub fn notify(&self, source: EventSource) -> Occurrence {
        self.record(source, Utc::now())
    }

    /// Advances the counter, stamps the occurrence, and releases every entry
    /// waiting for it, as one step under the lock.
    pub(crate) fn record(&self, source: EventSource, now: DateTime<Utc>) -> Occurrence {
        let mut sources = lock(&self.sources);
        let state = sources.entry(source).or_default();
        state.occurrence_count += 1;
        state.last_occurrence = Some(now);
        let count = state.occurrence_count;
        let due = state.pending.remove(&count).unwrap_or_default();
        drop(sources);

        let dispatches = due
            .into_iter()
            .map(|entry| match entry.time_shift_ns {
                0 => Dispatch::FireNow(entry.callback),
                shift => Dispatch::ArmAt(shift_by_nanos(now, shift), entry.callback),
            })
            .collect();
        Occurrence {
            count,
            timestamp: now,
            dispatches,
        }
    }

    pub fn occurrence_count(&self, source: EventSource) -> u64 {
        lock(&self.sources)
            .get(&source)
            .map_or(0, |state| state.occurrence_count)
    }

    pub fn pending_count(&self, source: EventSource) -> usize {
        lock(&self.sources)
            .get(&source)
            .map_or(0, |state| state.pending.values().map(Vec::len).sum())
    }
}

/// The occurrence label a registration resolves to, or `None` when it would
/// fall before the first occurrence.
fn target_count(current: u64, origin: CountOrigin, count: u64) -> Option<u64> {
    match origin {
        CountOrigin::Next => current.checked_add(count),
        CountOrigin::Previous => current.checked_add(count)?.checked_sub(1),
        CountOrigin::Current => Some(current),
    }
}
