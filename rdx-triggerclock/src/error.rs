//! Structured error types for the Triggerclock scheduler.

use crate::common::TimerId;
use thiserror::Error;

/// Errors produced by the scheduler and its timer worker.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Work was submitted after `stop()`; the callback will never run.
    #[error("scheduler has been stopped")]
    Stopped,

    /// The timer worker's runtime or thread could not be created.
    #[error("failed to start the timer worker: {0}")]
    Runtime(#[from] std::io::Error),

    /// A user callback panicked on the timer worker.
    ///
    /// Built at the worker boundary for logging and for the event stream;
    /// it is never returned to a caller and the callback is never retried.
    #[error("callback {} panicked: {message}", describe(.timer))]
    Callback {
        timer: Option<TimerId>,
        message: String,
    },
}

fn describe(timer: &Option<TimerId>) -> String {
    match timer {
        Some(id) => format!("for timer {:?}", id),
        None => "for immediate request".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
