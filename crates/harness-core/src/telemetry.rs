//! Rate-limited execution telemetry.

use std::time::Duration;

use crate::api::DEFAULT_SAMPLE_INTERVAL;

/// Uptime shown when no snapshot exists.
pub const ZERO_UPTIME_TEXT: &str = "0s";

/// Derived execution figures at one sampling instant.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TelemetrySnapshot {
    /// Steps executed since the session started.
    pub cycle_count: u64,
    /// Wall time since the session started.
    #[cfg_attr(feature = "serde", serde(with = "crate::api::duration_ms"))]
    pub elapsed: Duration,
    /// `cycle_count / elapsed`, or zero for zero elapsed time.
    pub instructions_per_second: f64,
}

impl TelemetrySnapshot {
    /// Computes a snapshot from raw counters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(cycle_count: u64, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64();
        let instructions_per_second = if seconds > 0.0 {
            cycle_count as f64 / seconds
        } else {
            0.0
        };
        Self {
            cycle_count,
            elapsed,
            instructions_per_second,
        }
    }

    /// Elapsed time in seconds.
    #[must_use]
    pub const fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Uptime with one decimal, e.g. `1.5s`.
    #[must_use]
    pub fn uptime_text(&self) -> String {
        format!("{:.1}s", self.elapsed_seconds())
    }
}

/// Bounds how often snapshots are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    min_interval: Duration,
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

impl SamplingPolicy {
    /// Creates a policy with the given minimum spacing.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Minimum spacing between snapshots.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Produces a snapshot if `min_interval` has passed since `last_sample`.
    ///
    /// `last_sample` should equal `start` before the first snapshot of a
    /// session. The caller records `now` as the new `last_sample` whenever a
    /// snapshot is returned.
    #[must_use]
    pub fn sample(
        &self,
        now: Duration,
        cycle_count: u64,
        start: Duration,
        last_sample: Duration,
    ) -> Option<TelemetrySnapshot> {
        if now.saturating_sub(last_sample) < self.min_interval {
            return None;
        }
        Some(TelemetrySnapshot::compute(
            cycle_count,
            now.saturating_sub(start),
        ))
    }
}
