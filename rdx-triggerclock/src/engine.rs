//! The scheduler façade that routes triggers to the timer engine or the
//! event registry.

use crate::common::EventSource;
use crate::components::registry::{Dispatch, EventRegistry, Resolution};
use crate::components::timer::{TimerEngine, TimerHandle};
use crate::components::Callback;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::events::SchedulerEvent;
use crate::time::{self, AbsoluteTime, EventBasedTime, Trigger};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// The main Triggerclock scheduler.
///
/// This struct is the central point of control. It owns the timer worker and
/// the per-source event state, and accepts work from any thread. Construct
/// one at startup, share it behind an `Arc`, and call [`stop`](Self::stop)
/// at shutdown; dropping it stops it as well.
pub struct Scheduler {
    config: Arc<SchedulerConfig>,
    timers: TimerEngine,
    registry: EventRegistry,
    event_sender: broadcast::Sender<SchedulerEvent>,
}

// Core implementation block for internal logic.
impl Scheduler {
    /// Creates a `Scheduler` and starts its timer worker.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));
        let timers = TimerEngine::start(&config, event_sender.clone())?;
        info!(stop_policy = ?config.stop_policy, "Scheduler started.");
        Ok(Self {
            config: Arc::new(config),
            timers,
            registry: EventRegistry::new(),
            event_sender,
        })
    }

    #[doc(hidden)]
    fn register(&self, time: &EventBasedTime, callback: Callback) -> Result<()> {
        match self.registry.register(time, callback) {
            Resolution::Queued { target_count } => {
                self.event_sender
                    .send(SchedulerEvent::RegistrationQueued {
                        source: time.source,
                        target_count,
                    })
                    .ok();
                Ok(())
            }
            Resolution::Replay {
                deadline, callback, ..
            } => self.timers.arm_at(deadline, callback).map(TimerHandle::detach),
            Resolution::Dropped {
                target_count,
                occurrence_count,
            } => {
                self.event_sender
                    .send(SchedulerEvent::RegistrationDropped {
                        source: time.source,
                        target_count,
                        occurrence_count,
                    })
                    .ok();
                Ok(())
            }
        }
    }

    #[doc(hidden)]
    fn dispatch(&self, dispatch: Dispatch) -> Result<()> {
        match dispatch {
            Dispatch::FireNow(callback) => self.timers.fire_now(callback),
            Dispatch::ArmAt(deadline, callback) => self
                .timers
                .arm_at(deadline, callback)
                .map(TimerHandle::detach),
        }
    }
}

// Public API implementation block.
impl Scheduler {
    /// Schedules `callback` to run once when `trigger` is satisfied.
    ///
    /// The callback runs on the timer worker, never on the calling thread.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Stopped`] after [`stop`](Self::stop) for
    /// immediate and absolute triggers, and for event-based triggers whose
    /// target has already happened. Event-based registrations still waiting
    /// for an occurrence are accepted but can no longer fire.
    ///
    /// [`SchedulerError::Stopped`]: crate::error::SchedulerError::Stopped
    pub fn schedule(
        &self,
        trigger: Trigger,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let callback: Callback = Box::new(callback);
        match trigger {
            Trigger::Immediate => self.timers.fire_now(callback),
            Trigger::Absolute(at) => self
                .timers
                .arm_at(time::from_absolute(at), callback)
                .map(TimerHandle::detach),
            Trigger::EventBased(event) => self.register(&event, callback),
        }
    }

    /// Arms a cancellable one-shot timer at a wall-clock instant.
    ///
    /// Dropping the returned handle cancels the timer.
    pub fn schedule_at(
        &self,
        deadline: DateTime<Utc>,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<TimerHandle> {
        self.timers.arm_at(deadline, Box::new(callback))
    }

    /// Records one occurrence of `source` and releases every callback that
    /// was waiting for it.
    ///
    /// Callable from any thread, typically the one reading the device.
    pub fn notify_event(&self, source: EventSource) {
        let occurrence = self.registry.notify(source);
        let resolved = occurrence.dispatches.len();
        trace!(%source, count = occurrence.count, resolved, "Occurrence recorded.");

        for dispatch in occurrence.dispatches {
            if let Err(err) = self.dispatch(dispatch) {
                debug!(%source, "Released callback discarded: {}", err);
            }
        }
        self.event_sender
            .send(SchedulerEvent::OccurrenceRecorded {
                source,
                count: occurrence.count,
                timestamp: occurrence.timestamp,
                resolved,
            })
            .ok();
    }

    /// Stops the timer worker and waits for it to exit.
    ///
    /// Idempotent; see [`TimerEngine::stop`].
    pub fn stop(&self) {
        self.timers.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.timers.is_stopped()
    }

    /// Encodes a wall-clock instant as an epoch-relative absolute time.
    pub fn to_absolute(&self, instant: DateTime<Utc>) -> AbsoluteTime {
        time::to_absolute(instant)
    }

    /// Decodes an epoch-relative absolute time into a wall-clock instant.
    pub fn from_absolute(&self, absolute: AbsoluteTime) -> DateTime<Utc> {
        time::from_absolute(absolute)
    }

    /// Number of times `notify_event(source)` has been called.
    pub fn occurrence_count(&self, source: EventSource) -> u64 {
        self.registry.occurrence_count(source)
    }

    /// Number of callbacks waiting for a future occurrence of `source`.
    pub fn pending_count(&self, source: EventSource) -> usize {
        self.registry.pending_count(source)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Subscribes to the `SchedulerEvent` stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_sender.subscribe()
    }
}
