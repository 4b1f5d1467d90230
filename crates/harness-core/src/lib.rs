//! Execution harness for running compiled microcontroller images on a
//! virtual CPU model at the host's frame cadence.

/// Host contracts and configuration.
pub mod api;
pub use api::{
    BurstBudget, ConfigError, CpuFactory, CpuModel, FrameHost, HarnessConfig, ListenerId, PinId,
    PinLevel, PinListener, SignalBinding, DEFAULT_BURST_MAX_INSTRUCTIONS,
    DEFAULT_BURST_WALL_CLOCK, DEFAULT_LED_PIN, DEFAULT_LED_SIGNAL, DEFAULT_SAMPLE_INTERVAL,
};

/// Error taxonomy surfaced to hosts.
pub mod fault;
pub use fault::{CpuFault, CpuFaultKind, ErrorClass, HarnessError};

/// Program image model and Intel HEX loading.
pub mod image;
pub use image::{BinaryImage, ImageError, DEFAULT_MAX_IMAGE_BYTES, WORD_BYTES};

/// Monotonic clocks.
pub mod timing;
pub use timing::{Clock, ManualClock, SystemClock};

/// Pin subscriptions and the shared signal board.
pub mod observer;
pub use observer::{attach, PinSubscription, SignalState, Signals};

/// Time-boxed burst execution and burst tokens.
pub mod scheduler;
pub use scheduler::{BurstExit, BurstReport, BurstToken, Continuation, Scheduler, TokenSource};

/// Rate-limited execution telemetry.
pub mod telemetry;
pub use telemetry::{SamplingPolicy, TelemetrySnapshot, ZERO_UPTIME_TEXT};

/// Lifecycle state and the simulation session aggregate.
pub mod state;
pub use state::{LifecycleState, SessionCounters, SessionId, SimulationSession};

/// Compiler service boundary and wire format.
pub mod compiler;
pub use compiler::{
    BuildRequest, BuildResponse, CompileRequest, CompileTicket, CompilerService, StaleTicket,
};

/// Lifecycle controller.
pub mod controller;
pub use controller::Controller;

/// Presentation outputs.
pub mod view;
pub use view::StatusView;

#[cfg(test)]
use env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use serde_json as _;
