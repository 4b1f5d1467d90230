use crate::fault::HarnessError;

/// Lifecycle of the one simulation a controller manages.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LifecycleState {
    /// Nothing loaded; ready for a start command.
    #[default]
    Idle,
    /// Waiting for the compiler service to answer.
    Compiling,
    /// A session is stepping on the host's frame cadence.
    Running,
    /// The session was stopped and torn down.
    Stopped,
    /// Terminal until reset.
    Error(HarnessError),
}

impl LifecycleState {
    /// Status phrase shown by the presentation layer.
    #[must_use]
    pub const fn status_text(&self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Compiling => "Compiling...",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error(_) => "Error",
        }
    }

    /// Returns the error held by [`Self::Error`].
    #[must_use]
    pub const fn error(&self) -> Option<&HarnessError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Idle | Self::Compiling | Self::Running | Self::Stopped => None,
        }
    }

    /// Whether `start` is accepted from this state.
    #[must_use]
    pub const fn accepts_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState;
    use crate::fault::HarnessError;

    #[test]
    fn default_state_is_idle_and_ready() {
        assert_eq!(LifecycleState::default(), LifecycleState::Idle);
        assert_eq!(LifecycleState::Idle.status_text(), "Ready");
    }

    #[test]
    fn error_accessor_reports_only_error_variant() {
        let state = LifecycleState::Error(HarnessError::CompileFailure("syntax error".to_owned()));
        assert_eq!(state.status_text(), "Error");
        assert_eq!(
            state.error().map(ToString::to_string).as_deref(),
            Some("syntax error")
        );
        assert_eq!(LifecycleState::Running.error(), None);
    }

    #[test]
    fn start_is_accepted_only_when_nothing_is_pending_or_failed() {
        assert!(LifecycleState::Idle.accepts_start());
        assert!(LifecycleState::Stopped.accepts_start());
        assert!(!LifecycleState::Compiling.accepts_start());
        assert!(!LifecycleState::Running.accepts_start());
        assert!(!LifecycleState::Error(HarnessError::generic_compile_failure()).accepts_start());
    }
}
