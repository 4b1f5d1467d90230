//! Compiler service boundary.
//!
//! The controller never calls a compiler itself. [`crate::Controller::start`]
//! hands out a [`CompileRequest`] and the host answers later through
//! [`crate::Controller::complete_compile`] with the request's ticket. Hosts
//! with a blocking compiler can use [`CompilerService`] and
//! [`crate::Controller::start_with`] instead.

use core::fmt;

use thiserror::Error;

use crate::fault::HarnessError;

/// Identifies one compile round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CompileTicket(u64);

impl CompileTicket {
    /// Wraps a raw ticket value received back from the host.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw ticket value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CompileTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Work the host must forward to the compiler service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Ticket to quote when the compile settles.
    pub ticket: CompileTicket,
    /// Source text as submitted.
    pub source: String,
}

impl CompileRequest {
    /// Request body in the compiler's wire format.
    #[must_use]
    pub fn body(&self) -> BuildRequest {
        BuildRequest {
            sketch: self.source.clone(),
        }
    }
}

/// Compiler request body: `{"sketch": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BuildRequest {
    /// Source text.
    pub sketch: String,
}

/// Compiler response body: `{"hex": "...", "stderr": "..."}`, both optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BuildResponse {
    /// Intel HEX image text.
    #[cfg_attr(feature = "serde", serde(default))]
    pub hex: Option<String>,
    /// Compiler diagnostics.
    #[cfg_attr(feature = "serde", serde(default))]
    pub stderr: Option<String>,
}

impl BuildResponse {
    /// Applies the fail-open rules.
    ///
    /// A non-blank image wins even when diagnostics are present. Without one,
    /// non-blank diagnostics become a compile failure and anything else a
    /// generic compilation failure.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::CompileFailure`] or
    /// [`HarnessError::TransportFailure`] when no image was returned.
    pub fn into_outcome(self) -> Result<String, HarnessError> {
        match (self.hex, self.stderr) {
            (Some(hex), _) if !hex.trim().is_empty() => Ok(hex),
            (_, Some(stderr)) if !stderr.trim().is_empty() => {
                Err(HarnessError::CompileFailure(stderr))
            }
            _ => Err(HarnessError::generic_compile_failure()),
        }
    }
}

/// Blocking compiler client.
pub trait CompilerService {
    /// Transport-level failure type.
    type Error: fmt::Display;

    /// Compiles one request.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when no response could be obtained.
    fn build(&mut self, request: &BuildRequest) -> Result<BuildResponse, Self::Error>;
}

/// A settle call quoted a ticket that is not the pending compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("compile ticket {0} is not pending")]
pub struct StaleTicket(pub CompileTicket);

/// Runs `request` on `service` and folds transport errors into the outcome.
pub(crate) fn settle<S: CompilerService + ?Sized>(
    service: &mut S,
    request: &CompileRequest,
) -> Result<String, HarnessError> {
    service
        .build(&request.body())
        .map_err(|err| HarnessError::TransportFailure(err.to_string()))
        .and_then(BuildResponse::into_outcome)
}

#[cfg(test)]
mod tests {
    use super::BuildResponse;
    use crate::fault::HarnessError;

    fn response(hex: Option<&str>, stderr: Option<&str>) -> BuildResponse {
        BuildResponse {
            hex: hex.map(str::to_owned),
            stderr: stderr.map(str::to_owned),
        }
    }

    #[test]
    fn image_wins_over_warnings() {
        let outcome = response(Some(":00000001FF"), Some("warning: unused")).into_outcome();
        assert_eq!(outcome, Ok(":00000001FF".to_owned()));
    }

    #[test]
    fn diagnostics_without_image_are_compile_failures() {
        let outcome = response(Some(""), Some("syntax error")).into_outcome();
        assert_eq!(
            outcome,
            Err(HarnessError::CompileFailure("syntax error".to_owned()))
        );
    }

    #[test]
    fn empty_response_fails_open() {
        assert_eq!(
            response(None, None).into_outcome(),
            Err(HarnessError::generic_compile_failure())
        );
        assert_eq!(
            response(Some("  "), Some("\n")).into_outcome(),
            Err(HarnessError::generic_compile_failure())
        );
    }
}
