//! Defines all configuration structures for the Triggerclock scheduler.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`. Every field has a default, so an empty
//! file or no file at all yields a working scheduler.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

/// The top-level configuration for the `Scheduler`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the dedicated timer worker thread.
    pub worker_name: String,

    /// What happens to armed, unexpired timers when the scheduler stops.
    pub stop_policy: StopPolicy,

    /// Buffer size of the `SchedulerEvent` broadcast channel. Slow
    /// subscribers lag rather than block the scheduler.
    pub event_capacity: usize,
}

/// Defines how `stop()` treats timers that have not expired yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Drop armed timers whose deadline has not been reached.
    #[default]
    CancelPending,
    /// Keep the worker alive until every armed timer has fired.
    AwaitPending,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_name: "triggerclock-timer".to_string(),
            stop_policy: StopPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Loads a configuration file. The format is taken from the extension.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|raw| raw.try_deserialize())
            .with_context(|| format!("failed to load scheduler config from {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_tempfile(content: &str) -> NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_cancel_pending_timers() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.stop_policy, StopPolicy::CancelPending);
        assert_eq!(cfg.worker_name, "triggerclock-timer");
        assert_eq!(cfg.event_capacity, 256);
    }

    #[test]
    fn load_overrides_only_given_fields() {
        let file = toml_tempfile("stop_policy = \"await_pending\"\n");
        let cfg = SchedulerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.stop_policy, StopPolicy::AwaitPending);
        assert_eq!(cfg.worker_name, "triggerclock-timer");
    }

    #[test]
    fn load_reads_every_field() {
        let file = toml_tempfile(
            r#"
worker_name = "sensor-timer"
stop_policy = "cancel_pending"
event_capacity = 16
"#,
        );
        let cfg = SchedulerConfig::load(file.path()).unwrap();
        assert_eq!(
            cfg,
            SchedulerConfig {
                worker_name: "sensor-timer".to_string(),
                stop_policy: StopPolicy::CancelPending,
                event_capacity: 16,
            }
        );
    }

    #[test]
    fn load_rejects_unknown_policy() {
        let file = toml_tempfile("stop_policy = \"sometimes\"\n");
        let err = SchedulerConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to load scheduler config"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(SchedulerConfig::load("/nonexistent/triggerclock.toml").is_err());
    }
}
