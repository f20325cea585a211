// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller liveness heartbeat.
//!
//! A timer independent of the work queues writes a liveness signal (a
//! prometheus gauge holding the epoch timestamp of the last beat) at a
//! configured interval and optionally logs a line per beat. When a beat
//! arrives later than twice the interval the controller self-reports
//! degraded via a warning and a counter.

use crate::metrics;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Log level of the per-beat log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeatLogLevel {
    /// No log line per beat, metrics only.
    None,
    Debug,
    Info,
}

impl BeatLogLevel {
    /// Parse from the `STEWARD_HEARTBEAT_LOG_LEVEL` environment value.
    /// Unknown values fall back to `Debug`.
    #[must_use]
    pub fn from_env_value(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "none" | "off" => Self::None,
            "info" => Self::Info,
            _ => Self::Debug,
        }
    }
}

/// Run the heartbeat loop until the process shuts down.
///
/// Intended to be spawned once per controller process. `controller` names
/// the emitting controller in the missed-beat counter.
pub async fn run(controller: &str, interval: Duration, log_level: BeatLogLevel) {
    info!(
        controller,
        interval_secs = interval.as_secs(),
        "Starting heartbeat"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately; it seeds `last_beat`
    let mut last_beat: Option<Instant> = None;

    loop {
        ticker.tick().await;
        let now = Instant::now();

        if let Some(previous) = last_beat {
            let elapsed = now.duration_since(previous);
            if elapsed > interval * 2 {
                warn!(
                    controller,
                    elapsed_secs = elapsed.as_secs(),
                    interval_secs = interval.as_secs(),
                    "Heartbeat degraded: beat arrived later than twice the interval"
                );
                metrics::record_missed_heartbeat(controller);
            }
        }
        last_beat = Some(now);

        #[allow(clippy::cast_precision_loss)]
        metrics::record_heartbeat(Utc::now().timestamp() as f64);
        match log_level {
            BeatLogLevel::None => {}
            BeatLogLevel::Debug => debug!(controller, "Heartbeat"),
            BeatLogLevel::Info => info!(controller, "Heartbeat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_log_level_parsing() {
        assert_eq!(BeatLogLevel::from_env_value("none"), BeatLogLevel::None);
        assert_eq!(BeatLogLevel::from_env_value("off"), BeatLogLevel::None);
        assert_eq!(BeatLogLevel::from_env_value("info"), BeatLogLevel::Info);
        assert_eq!(BeatLogLevel::from_env_value("INFO"), BeatLogLevel::Info);
        assert_eq!(BeatLogLevel::from_env_value("debug"), BeatLogLevel::Debug);
        assert_eq!(BeatLogLevel::from_env_value("bogus"), BeatLogLevel::Debug);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_updates_timestamp_gauge() {
        let handle = tokio::spawn(run(
            "test",
            Duration::from_secs(60),
            BeatLogLevel::None,
        ));

        // let the first immediate tick run
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(crate::metrics::HEARTBEAT_TIMESTAMP_SECONDS.get() > 0.0);

        handle.abort();
    }
}
