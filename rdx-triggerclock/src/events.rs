//! Defines all public event types broadcast by the Triggerclock scheduler.
//!
//! Subscribers observe what the scheduler decided and when callbacks ran,
//! without being able to influence either. Events are informational: a
//! lagging or missing subscriber never slows the scheduler down.

use crate::common::{EventSource, TimerId};
use chrono::{DateTime, Utc};

/// Everything the scheduler reports about its own activity.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Fired once when the timer worker begins processing.
    EngineStarted { timestamp: DateTime<Utc> },
    /// Fired once when the timer worker exits.
    EngineStopped { cancelled_timers: usize },
    /// A one-shot timer was armed.
    TimerArmed { id: TimerId, deadline: DateTime<Utc> },
    /// An armed timer expired and its callback completed.
    TimerFired { id: TimerId },
    /// An armed timer was cancelled before it expired.
    TimerCancelled { id: TimerId },
    /// A fire-now callback completed.
    ImmediateFired,
    /// A callback panicked. The worker carried on.
    CallbackFailed {
        timer: Option<TimerId>,
        message: String,
    },
    /// `notify_event` advanced a source's counter.
    OccurrenceRecorded {
        source: EventSource,
        count: u64,
        timestamp: DateTime<Utc>,
        resolved: usize,
    },
    /// An event-based registration is waiting for a future occurrence.
    RegistrationQueued {
        source: EventSource,
        target_count: u64,
    },
    /// An event-based registration targeted an occurrence too far in the
    /// past and was discarded.
    RegistrationDropped {
        source: EventSource,
        target_count: Option<u64>,
        occurrence_count: u64,
    },
}
