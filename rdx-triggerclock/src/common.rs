//! Contains common, primitive types and a prelude for easy importing.
//!
//! This module defines the identifiers used to name armed timers and external
//! event sources within the Triggerclock scheduler. Using distinct types
//! improves type safety and code clarity.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

/// A prelude module for convenient importing of the most common Triggerclock types.
///
/// # Example
/// ```
/// use triggerclock::prelude::*;
/// ```
pub mod prelude {
    pub use super::{EventSource, TimerId};
    pub use crate::components::timer::TimerHandle;
    pub use crate::config::{SchedulerConfig, StopPolicy};
    pub use crate::engine::Scheduler;
    pub use crate::error::SchedulerError;
    pub use crate::events::SchedulerEvent;
    pub use crate::time::{AbsoluteTime, CountOrigin, EventBasedTime, Trigger};
}

new_key_type! {
    /// Uniquely and safely identifies an armed one-shot timer.
    ///
    /// The key is handed out when a timer is armed and is never reused, so a
    /// stale handle can never cancel a newer timer that landed in the same slot.
    pub struct TimerId;
}

/// Identifies an independent stream of discrete occurrences, such as a
/// hardware signal raised by the device layer.
///
/// Sources are created implicitly the first time they are scheduled against
/// or notified, starting with an occurrence count of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSource(pub u32);

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}
