//! Contains the building blocks the `Scheduler` is assembled from.
//!
//! The timer engine owns the single worker that runs every callback, and the
//! event registry resolves event-based triggers against per-source counters.
//! The `Scheduler` routes each trigger to one or the other.

pub mod registry;
pub mod timer;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A scheduled unit of work. Runs at most once.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Callbacks never run while one of these locks is held, so a poisoned
/// lock still guards consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
