//! Controller-owned lifecycle and session state.

/// Lifecycle state machine values.
pub mod lifecycle;
/// Live simulation session aggregate.
pub mod session;

pub use lifecycle::LifecycleState;
pub use session::{SessionCounters, SessionId, SimulationSession};
