//! The timer engine: a single dedicated worker that runs every callback.
//!
//! The worker is a named OS thread driving a current-thread Tokio runtime.
//! Fire-now requests and newly armed deadlines reach it over an unbounded
//! channel, so FIFO order among fire-now requests from one submitter is
//! preserved. Armed callbacks live in a slot arena shared with their
//! [`TimerHandle`]s; whoever removes a timer from the arena first (the worker
//! on expiry, or the handle on cancel) owns its fate, so a timer fires or is
//! cancelled exactly once.

use super::{lock, Callback};
use crate::common::TimerId;
use crate::config::{SchedulerConfig, StopPolicy};
use crate::error::{Result, SchedulerError};
use crate::events::SchedulerEvent;
use chrono::{DateTime, Utc};
use slotmap::SlotMap;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep_until;
use tracing::{debug, error, info, trace, warn};

type TimerArena = Mutex<SlotMap<TimerId, Callback>>;

/// Deadlines too far out for `Instant` arithmetic are parked here instead.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

enum Command {
    FireNow(Callback),
    Armed { id: TimerId, at: Instant },
}

/// Owns the worker that executes armed timers and fire-now requests.
///
/// Callbacks never run concurrently with each other; a slow callback delays
/// everything queued behind it.
pub struct TimerEngine {
    timers: Arc<TimerArena>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    cancelled: Arc<Notify>,
    event_sender: broadcast::Sender<SchedulerEvent>,
}

impl TimerEngine {
    /// Spawns the worker thread and its runtime.
    pub fn start(
        config: &SchedulerConfig,
        event_sender: broadcast::Sender<SchedulerEvent>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let timers = Arc::new(Mutex::new(SlotMap::with_key()));
        let cancelled = Arc::new(Notify::new());

        let worker = Worker {
            timers: timers.clone(),
            cancelled: cancelled.clone(),
            commands: command_rx,
            deadlines: BTreeSet::new(),
            stop_policy: config.stop_policy,
            event_sender: event_sender.clone(),
        };
        let handle = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || runtime.block_on(worker.run()))?;

        info!(worker = %config.worker_name, "Timer engine started.");
        Ok(Self {
            timers,
            commands: Mutex::new(Some(command_tx)),
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
            cancelled,
            event_sender,
        })
    }

    /// Queues `callback` to run as soon as the worker is free.
    pub fn fire_now(&self, callback: Callback) -> Result<()> {
        let commands = lock(&self.commands);
        let sender = commands.as_ref().ok_or(SchedulerError::Stopped)?;
        sender
            .send(Command::FireNow(callback))
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Arms a one-shot timer that runs `callback` no earlier than `deadline`.
    ///
    /// Deadlines in the past fire as soon as the worker is free.
    pub fn arm_at(&self, deadline: DateTime<Utc>, callback: Callback) -> Result<TimerHandle> {
        let commands = lock(&self.commands);
        let sender = commands.as_ref().ok_or(SchedulerError::Stopped)?;

        let id = lock(&self.timers).insert(callback);
        let at = monotonic_deadline(deadline);
        if sender.send(Command::Armed { id, at }).is_err() {
            let _unarmed = lock(&self.timers).remove(id);
            return Err(SchedulerError::Stopped);
        }
        drop(commands);

        trace!(timer = ?id, %deadline, "Timer armed.");
        self.event_sender
            .send(SchedulerEvent::TimerArmed { id, deadline })
            .ok();
        Ok(TimerHandle {
            id,
            timers: Arc::downgrade(&self.timers),
            cancelled: self.cancelled.clone(),
            event_sender: self.event_sender.clone(),
            detached: false,
        })
    }

    /// Stops accepting work, drains what was already submitted, and joins
    /// the worker. Safe to call repeatedly and from several threads; every
    /// caller except a callback on the worker itself returns only once the
    /// worker has exited.
    pub fn stop(&self) {
        let closed = self.close();
        if thread::current().id() == self.worker_id {
            if closed {
                warn!("stop() called from a callback; the worker exits once it returns.");
            }
            return;
        }

        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                error!("Timer worker panicked during shutdown.");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.commands).is_none()
    }

    /// Drops the command sender. Returns `true` only for the call that did so.
    fn close(&self) -> bool {
        let Some(sender) = lock(&self.commands).take() else {
            return false;
        };
        drop(sender);
        info!("Timer engine stopping...");
        true
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Converts a wall-clock deadline into the monotonic clock the worker sleeps on.
fn monotonic_deadline(deadline: DateTime<Utc>) -> Instant {
    // Wall clock first: any gap between the two reads can only push the
    // monotonic deadline later, never earlier.
    let wall_now = Utc::now();
    let now = Instant::now();
    match (deadline - wall_now).to_std() {
        Ok(delay) => now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE),
        Err(_) => now,
    }
}

/// Exclusive ownership of one armed timer.
///
/// Dropping the handle cancels the timer if it has not fired yet; call
/// [`detach`](TimerHandle::detach) to let it fire unattended instead.
#[must_use = "dropping a TimerHandle cancels its timer; call `detach` to let it fire"]
pub struct TimerHandle {
    id: TimerId,
    timers: Weak<TimerArena>,
    cancelled: Arc<Notify>,
    event_sender: broadcast::Sender<SchedulerEvent>,
    detached: bool,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Returns `true` while the timer is armed and has not fired.
    pub fn is_pending(&self) -> bool {
        let Some(timers) = self.timers.upgrade() else {
            return false;
        };
        let pending = lock(&timers).contains_key(self.id);
        pending
    }

    /// Cancels the timer. Returns `false` if it had already fired or been
    /// discarded by shutdown.
    pub fn cancel(mut self) -> bool {
        self.detached = true;
        self.disarm()
    }

    /// Releases the handle, leaving the timer armed.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn disarm(&self) -> bool {
        let Some(timers) = self.timers.upgrade() else {
            return false;
        };
        let removed = lock(&timers).remove(self.id);
        if removed.is_none() {
            return false;
        }
        self.cancelled.notify_one();
        debug!(timer = ?self.id, "Timer cancelled.");
        self.event_sender
            .send(SchedulerEvent::TimerCancelled { id: self.id })
            .ok();
        true
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.disarm();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}

struct Worker {
    timers: Arc<TimerArena>,
    /// Signalled by handles on cancel, so a shutdown wait can skip the timer.
    cancelled: Arc<Notify>,
    commands: mpsc::UnboundedReceiver<Command>,
    deadlines: BTreeSet<(Instant, TimerId)>,
    stop_policy: StopPolicy,
    event_sender: broadcast::Sender<SchedulerEvent>,
}

impl Worker {
    async fn run(mut self) {
        self.event_sender
            .send(SchedulerEvent::EngineStarted {
                timestamp: Utc::now(),
            })
            .ok();

        loop {
            let next_deadline = self.deadlines.first().map(|(at, _)| *at);
            tokio::select! {
                biased;
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now).into()), if next_deadline.is_some() => {
                    self.fire_expired();
                }
                command = self.commands.recv() => match command {
                    Some(Command::FireNow(callback)) => self.execute(None, callback),
                    Some(Command::Armed { id, at }) => {
                        self.deadlines.insert((at, id));
                    }
                    // Every sender is gone: `stop()` was called and all
                    // queued commands have been handled.
                    None => break,
                },
            }
        }

        self.fire_expired();
        let cancelled_timers = match self.stop_policy {
            StopPolicy::AwaitPending => {
                self.await_pending().await;
                0
            }
            StopPolicy::CancelPending => self.cancel_pending(),
        };

        info!(cancelled_timers, "Timer worker has shut down.");
        self.event_sender
            .send(SchedulerEvent::EngineStopped { cancelled_timers })
            .ok();
    }

    /// Runs every timer whose deadline has passed, in deadline order.
    fn fire_expired(&mut self) {
        let now = Instant::now();
        while let Some(&(at, id)) = self.deadlines.first() {
            if at > now {
                break;
            }
            self.deadlines.pop_first();
            // Absent when the handle cancelled it first.
            let callback = lock(&self.timers).remove(id);
            if let Some(callback) = callback {
                self.execute(Some(id), callback);
            }
        }
    }

    async fn await_pending(&mut self) {
        while let Some(&(at, id)) = self.deadlines.first() {
            if !lock(&self.timers).contains_key(id) {
                self.deadlines.pop_first();
                continue;
            }
            debug!(timer = ?id, "Waiting for armed timer before shutdown.");
            tokio::select! {
                _ = sleep_until(at.into()) => self.fire_expired(),
                _ = self.cancelled.notified() => {}
            }
        }
    }

    fn cancel_pending(&mut self) -> usize {
        self.deadlines.clear();
        let discarded: Vec<Callback> = lock(&self.timers).drain().map(|(_, cb)| cb).collect();
        discarded.len()
    }

    fn execute(&self, timer: Option<TimerId>, callback: Callback) {
        trace!(?timer, "Running callback.");
        match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(()) => {
                let event = match timer {
                    Some(id) => SchedulerEvent::TimerFired { id },
                    None => SchedulerEvent::ImmediateFired,
                };
                self.event_sender.send(event).ok();
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                let err = SchedulerError::Callback {
                    timer,
                    message: message.clone(),
                };
                error!("{}", err);
                self.event_sender
                    .send(SchedulerEvent::CallbackFailed { timer, message })
                    .ok();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine_with(config: SchedulerConfig) -> (TimerEngine, broadcast::Receiver<SchedulerEvent>) {
        let (event_sender, events) = broadcast::channel(256);
        (TimerEngine::start(&config, event_sender).unwrap(), events)
    }

    fn engine() -> TimerEngine {
        engine_with(SchedulerConfig::default()).0
    }

    fn in_millis(ms: i64) -> DateTime<Utc> {
        Utc::now() + TimeDelta::milliseconds(ms)
    }

    fn drain(events: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    #[test]
    fn fire_now_runs_with_no_timers_armed() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        engine.fire_now(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(WAIT).unwrap();
    }

    #[test]
    fn fire_now_preserves_submission_order() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            engine.fire_now(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let order: Vec<i32> = (0..10).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        for (label, delay) in [("late", 90), ("early", 30), ("middle", 60)] {
            let tx = tx.clone();
            engine
                .arm_at(in_millis(delay), Box::new(move || tx.send(label).unwrap()))
                .unwrap()
                .detach();
        }
        let order: Vec<&str> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(order, ["early", "middle", "late"]);
    }

    #[test]
    fn timer_does_not_fire_before_its_deadline() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        let deadline = in_millis(50);
        engine
            .arm_at(deadline, Box::new(move || tx.send(Utc::now()).unwrap()))
            .unwrap()
            .detach();
        let fired_at = rx.recv_timeout(WAIT).unwrap();
        assert!(fired_at >= deadline);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();

        let cancelled_tx = tx.clone();
        let handle = engine
            .arm_at(in_millis(40), Box::new(move || cancelled_tx.send("cancelled").unwrap()))
            .unwrap();
        assert!(handle.is_pending());
        assert!(handle.cancel());

        engine
            .arm_at(in_millis(80), Box::new(move || tx.send("kept").unwrap()))
            .unwrap()
            .detach();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropping_a_handle_cancels_its_timer() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        let dropped_tx = tx.clone();
        drop(engine.arm_at(in_millis(30), Box::new(move || dropped_tx.send("dropped").unwrap())));

        engine
            .arm_at(in_millis(60), Box::new(move || tx.send("kept").unwrap()))
            .unwrap()
            .detach();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cancel_after_firing_is_a_no_op() {
        let engine = engine();
        let (tx, rx) = std_mpsc::channel();
        let handle = engine
            .arm_at(in_millis(-1_000), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(WAIT).unwrap();
        assert!(!handle.is_pending());
        assert!(!handle.cancel());
    }

    #[test]
    fn panicking_callback_does_not_stop_the_worker() {
        let (engine, mut events) = engine_with(SchedulerConfig::default());
        let (tx, rx) = std_mpsc::channel();
        engine.fire_now(Box::new(|| panic!("sensor went away"))).unwrap();
        engine.fire_now(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(WAIT).unwrap();

        engine.stop();
        let failures: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                SchedulerEvent::CallbackFailed { timer, message } => Some((timer, message)),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![(None, "sensor went away".to_string())]);
    }

    #[test]
    fn stop_twice_then_reject_new_work() {
        let engine = engine();
        engine.stop();
        engine.stop();
        assert!(engine.is_stopped());

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        assert!(matches!(
            engine.fire_now(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            Err(SchedulerError::Stopped)
        ));
        assert!(matches!(
            engine.arm_at(in_millis(0), Box::new(|| {})),
            Err(SchedulerError::Stopped)
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_drains_queued_fire_now_requests() {
        let engine = engine();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let ran = ran.clone();
            engine
                .fire_now(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        engine.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn cancel_pending_policy_discards_unexpired_timers() {
        let (engine, mut events) = engine_with(SchedulerConfig::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        engine
            .arm_at(
                in_millis(10_000),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap()
            .detach();

        engine.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(drain(&mut events).contains(&SchedulerEvent::EngineStopped { cancelled_timers: 1 }));
    }

    #[test]
    fn await_pending_policy_fires_armed_timers_before_exiting() {
        let (engine, _events) = engine_with(SchedulerConfig {
            stop_policy: StopPolicy::AwaitPending,
            ..SchedulerConfig::default()
        });
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        engine
            .arm_at(
                in_millis(50),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap()
            .detach();

        engine.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn await_pending_skips_a_timer_cancelled_during_shutdown() {
        let (engine, _events) = engine_with(SchedulerConfig {
            stop_policy: StopPolicy::AwaitPending,
            ..SchedulerConfig::default()
        });
        let engine = Arc::new(engine);
        let handle = engine
            .arm_at(in_millis(60 * 60 * 1_000), Box::new(|| {}))
            .unwrap();

        let (tx, rx) = std_mpsc::channel();
        let stopping = engine.clone();
        let stopper = thread::spawn(move || {
            stopping.stop();
            tx.send(()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(handle.cancel());
        rx.recv_timeout(WAIT).unwrap();
        stopper.join().unwrap();
    }

    #[test]
    fn only_the_first_close_reports_it() {
        let engine = engine();
        assert!(engine.close());
        assert!(!engine.close());
        engine.stop();
        assert!(engine.is_stopped());
    }

    #[test]
    fn stop_from_a_callback_does_not_deadlock() {
        let engine = Arc::new(engine());
        let (tx, rx) = std_mpsc::channel();
        let inner = engine.clone();
        engine
            .fire_now(Box::new(move || {
                inner.stop();
                tx.send(inner.is_stopped()).unwrap();
            }))
            .unwrap();
        assert!(rx.recv_timeout(WAIT).unwrap());
        engine.stop();
        assert!(engine.is_stopped());
    }
}
