use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use triggerclock::prelude::*;
use triggerclock::ENGINE_NAME;

/// The simulated device raises this source at the end of every sweep.
const SWEEP: EventSource = EventSource(0);
const SWEEP_PERIOD: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the configuration, if a path was given.
    let config = match std::env::args().nth(1) {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };

    // 3. Create the scheduler.
    let scheduler = Arc::new(Scheduler::new(config).context("failed to start the scheduler")?);

    // 4. Observe what the scheduler decides.
    spawn_event_listener(&scheduler);

    // 5. Register callbacks against every kind of trigger.
    register_demo_callbacks(&scheduler)?;

    // 6. Simulate the device's sweep events until Ctrl+C.
    let device = scheduler.clone();
    let sweeps = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        loop {
            ticker.tick().await;
            device.notify_event(SWEEP);
        }
    });

    info!("{} running. Press Ctrl+C to shut down.", ENGINE_NAME.cyan());
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Stopping the scheduler...");
    sweeps.abort();
    let stopping = scheduler.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    info!("{} has shut down.", ENGINE_NAME);
    Ok(())
}

/// Logs the scheduler's event stream.
fn spawn_event_listener(scheduler: &Scheduler) {
    let mut events = scheduler.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::OccurrenceRecorded {
                    source,
                    count,
                    resolved,
                    ..
                }) => info!(
                    "{} {} occurrence #{} released {} callback(s)",
                    "[DEVICE]".blue(),
                    source,
                    count,
                    resolved
                ),
                Ok(SchedulerEvent::CallbackFailed { timer, message }) => {
                    warn!("{} {:?} failed: {}", "[CALLBACK]".red(), timer, message)
                }
                Ok(event) => debug!("[SCHEDULER] => {:?}", event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener fell behind."),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Registers one callback per trigger kind, plus a self-renewing sweep counter.
fn register_demo_callbacks(scheduler: &Arc<Scheduler>) -> Result<()> {
    scheduler.schedule(Trigger::immediate(), || {
        info!("{} Scheduler is live.", "[IMMEDIATE]".green())
    })?;

    let in_two_seconds = chrono::Utc::now() + chrono::TimeDelta::seconds(2);
    let trigger = Trigger::at(in_two_seconds);
    scheduler.schedule(trigger, move || {
        info!("{} Fired at {:?}.", "[ABSOLUTE]".green(), trigger)
    })?;

    scheduler.schedule(
        Trigger::event_based(SWEEP, CountOrigin::Next, 4, 0),
        || info!("{} Fourth sweep after startup.", "[EVENT]".green()),
    )?;

    scheduler.schedule(
        Trigger::event_based(SWEEP, CountOrigin::Next, 2, 100_000_000),
        || info!("{} 100ms after the second sweep.", "[EVENT]".green()),
    )?;

    // Armed and then cancelled; it never runs.
    let handle = scheduler.schedule_at(in_two_seconds, || {
        warn!("This timer should have been cancelled.")
    })?;
    handle.cancel();

    renew_sweep_counter(scheduler.clone(), Arc::new(AtomicU32::new(0)))?;
    Ok(())
}

/// Counts sweeps by re-registering for the next one each time it fires.
fn renew_sweep_counter(scheduler: Arc<Scheduler>, sweeps: Arc<AtomicU32>) -> Result<()> {
    let next = scheduler.clone();
    scheduler.schedule(
        Trigger::event_based(SWEEP, CountOrigin::Next, 1, 0),
        move || {
            let seen = sweeps.fetch_add(1, Ordering::Relaxed) + 1;
            if seen % 10 == 0 {
                info!("{} {} sweeps observed.", "[COUNTER]".yellow(), seen);
            }
            if let Err(err) = renew_sweep_counter(next, sweeps) {
                debug!("Sweep counter not renewed: {}", err);
            }
        },
    )?;
    Ok(())
}
