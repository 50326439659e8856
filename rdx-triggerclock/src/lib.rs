//! # Triggerclock
//!
//! A trigger scheduler for driving timed and event-triggered actions against
//! a radio or sensing device.
//!
//! Triggerclock runs every scheduled callback exactly once, on a single
//! dedicated worker, at the moment its trigger is satisfied. It is designed to
//! sit between an application (or an RPC layer describing receive cycles) and
//! the protocol layer that reads device events off a serial link.
//!
//! ## Core Concepts
//!
//! - **Trigger**: when a callback should run. `Immediate` runs as soon as the
//!   worker is free, `Absolute` at a point on a clock counted from
//!   2000-01-01T00:00:00Z, and `EventBased` on the n-th occurrence of an
//!   external event source, optionally shifted by a number of nanoseconds.
//! - **Timer Engine**: one worker thread runs all callbacks serially, in
//!   deadline order for timers and FIFO order for immediate requests. A
//!   panicking callback is logged and the worker carries on.
//! - **Event Registry**: every event source has an occurrence counter. The
//!   protocol layer calls `notify_event` whenever the device raises the
//!   event; registrations resolve against that counter, and a registration
//!   that arrives just after its occurrence is replayed rather than lost.
//! - **Event stream**: subscribers can observe every scheduling decision
//!   through `SchedulerEvent`s.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use triggerclock::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // 1. Create the scheduler with the default configuration.
//!     let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//!     // 2. Run something on the next sweep boundary of source 0.
//!     let sweep = EventSource(0);
//!     scheduler.schedule(
//!         Trigger::event_based(sweep, CountOrigin::Next, 1, 0),
//!         || println!("first sweep after registration"),
//!     )?;
//!
//!     // 3. The device layer reports the event.
//!     scheduler.notify_event(sweep);
//!
//!     // 4. Drain and join the worker.
//!     scheduler.stop();
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Triggerclock";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");


// Declare all the modules in the crate.
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod time;

pub use common::prelude;
