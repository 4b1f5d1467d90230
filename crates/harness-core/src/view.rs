//! Read-only presentation outputs.

use crate::observer::{SignalState, Signals};
use crate::state::LifecycleState;
use crate::telemetry::{TelemetrySnapshot, ZERO_UPTIME_TEXT};

/// Everything the presentation layer renders, captured at one instant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatusView {
    /// Status phrase tied to the lifecycle state.
    pub status: String,
    /// Error reason, verbatim, while in the error state.
    pub error: Option<String>,
    /// Steps executed by the current or most recent session.
    pub cycle_count: u64,
    /// Effective instructions per second from the latest snapshot.
    pub frequency_hz: f64,
    /// Uptime from the latest snapshot, one decimal.
    pub uptime: String,
    /// Whether the indicator signal is on.
    pub indicator: bool,
    /// Every watched signal.
    pub signals: Vec<SignalState>,
}

impl StatusView {
    pub(crate) fn compose(
        state: &LifecycleState,
        cycle_count: u64,
        snapshot: Option<&TelemetrySnapshot>,
        signals: &Signals,
        indicator: Option<&str>,
    ) -> Self {
        Self {
            status: state.status_text().to_owned(),
            error: state.error().map(ToString::to_string),
            cycle_count,
            frequency_hz: snapshot.map_or(0.0, |snap| snap.instructions_per_second),
            uptime: snapshot.map_or_else(
                || ZERO_UPTIME_TEXT.to_owned(),
                TelemetrySnapshot::uptime_text,
            ),
            indicator: indicator
                .and_then(|name| signals.get(name))
                .is_some_and(|signal| signal.is_high()),
            signals: signals.snapshot(),
        }
    }

    /// Frequency in MHz, for compact display.
    #[must_use]
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz / 1_000_000.0
    }
}
