use thiserror::Error;

use crate::image::ImageError;

/// Error classes used for logging and presentation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// Compiler rejected the submitted source.
    Compile,
    /// Compiler output could not be turned into a program image.
    Image,
    /// Virtual CPU model stopped on an execution fault.
    Cpu,
    /// Compile call never produced a usable response.
    Transport,
}

/// Broad fault categories a CPU model can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuFaultKind {
    /// Fetched word does not decode to a supported instruction.
    InvalidOpcode,
    /// Data or program memory access outside the modeled address space.
    MemoryFault,
    /// Model could not be constructed from the supplied image.
    Construction,
    /// Any other model-specific failure.
    #[default]
    Other,
}

/// Fault raised by the virtual CPU model while constructing or stepping.
///
/// The reason is surfaced to the user verbatim, so `Display` prints nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{reason}")]
pub struct CpuFault {
    kind: CpuFaultKind,
    reason: String,
}

impl CpuFault {
    /// Creates a fault with an explicit kind.
    #[must_use]
    pub fn new(kind: CpuFaultKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-opcode fault.
    #[must_use]
    pub fn invalid_opcode(reason: impl Into<String>) -> Self {
        Self::new(CpuFaultKind::InvalidOpcode, reason)
    }

    /// Creates a memory fault.
    #[must_use]
    pub fn memory(reason: impl Into<String>) -> Self {
        Self::new(CpuFaultKind::MemoryFault, reason)
    }

    /// Returns the fault category.
    #[must_use]
    pub const fn kind(&self) -> CpuFaultKind {
        self.kind
    }

    /// Returns the model-supplied reason text.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Stable error taxonomy for every failure the harness can surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HarnessError {
    /// Compiler reported a diagnostic for the submitted source.
    #[error("{0}")]
    CompileFailure(String),
    /// Compiler output failed record or checksum validation.
    #[error("malformed image: {0}")]
    MalformedImage(#[from] ImageError),
    /// CPU model faulted during construction or execution.
    #[error("{0}")]
    CpuFault(#[from] CpuFault),
    /// Compile call failed in transit or returned nothing usable.
    #[error("compilation failed: {0}")]
    TransportFailure(String),
}

impl HarnessError {
    /// Message used when the compiler answers with neither an image nor a diagnostic.
    pub const GENERIC_COMPILE_FAILURE: &'static str = "no image returned by the compiler";

    /// Returns the error class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::CompileFailure(_) => ErrorClass::Compile,
            Self::MalformedImage(_) => ErrorClass::Image,
            Self::CpuFault(_) => ErrorClass::Cpu,
            Self::TransportFailure(_) => ErrorClass::Transport,
        }
    }

    /// Builds the fail-open compile failure used for empty responses.
    #[must_use]
    pub fn generic_compile_failure() -> Self {
        Self::TransportFailure(Self::GENERIC_COMPILE_FAILURE.to_owned())
    }
}
