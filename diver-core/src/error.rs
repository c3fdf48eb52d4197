//! Error types for diver operations

use std::fmt;
use thiserror::Error;

/// A piece of the remote model contract the workflow locates by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractElement {
    /// `File` parameter accepting at least one `image/*` format
    ImageParameter,
    /// `String` parameter accepting at least 140 characters
    TextParameter,
    /// Output whose name contains "text"
    TextOutput,
    /// Export of type "download"
    DownloadExport,
}

impl ContractElement {
    /// Human-readable requirement the element has to satisfy.
    pub fn requirement(&self) -> &'static str {
        match self {
            Self::ImageParameter => "a 'File' parameter which accepts images",
            Self::TextParameter => {
                "a 'String' parameter which accepts strings with a length >= 140 characters"
            }
            Self::TextOutput => "an output whose name includes 'text'",
            Self::DownloadExport => "an export of type 'download'",
        }
    }
}

impl fmt::Display for ContractElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.requirement())
    }
}

/// Completion stage reported for an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStage {
    Computation,
    Collection,
}

impl CompletionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Computation => "computation",
            Self::Collection => "collection",
        }
    }
}

impl fmt::Display for CompletionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which constraint a caller input violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputViolation {
    #[error("text length {length} exceeds the declared maximum of {max}")]
    TextTooLong { length: usize, max: u64 },

    #[error("image type {content_type} is not one of {allowed:?}")]
    UnsupportedImageType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("image size {size} bytes exceeds the declared maximum of {max}")]
    ImageTooLarge { size: u64, max: u64 },
}

/// Which artifact turned out empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Output,
    Export,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => f.write_str("output"),
            Self::Export => f.write_str("export"),
        }
    }
}

/// Master error type for a relay run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("Maximum wait time of {budget_ms} msec reached")]
    DeadlineExceeded { budget_ms: u64 },

    #[error("Configuration mismatch: could not find {0}")]
    ConfigurationMismatch(ContractElement),

    #[error("Input rejected: {0}")]
    InputRejected(#[from] InputViolation),

    #[error("Transport failure during {operation}: {reason}")]
    TransportFailure { operation: String, reason: String },

    #[error("Remote {stage} step did not succeed for export {export_id}")]
    RemoteComputationFailed {
        export_id: String,
        stage: CompletionStage,
    },

    #[error("{kind} {id} result content is empty")]
    EmptyResult { kind: ArtifactKind, id: String },
}

impl RunError {
    /// Build a transport failure for the named remote operation.
    pub fn transport(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::TransportFailure {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable identifier of the error variant, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::ConfigurationMismatch(_) => "configuration_mismatch",
            Self::InputRejected(_) => "input_rejected",
            Self::TransportFailure { .. } => "transport_failure",
            Self::RemoteComputationFailed { .. } => "remote_computation_failed",
            Self::EmptyResult { .. } => "empty_result",
        }
    }
}

/// Result type alias for relay operations.
pub type RunResult<T> = Result<T, RunError>;

// =============================================================================
// TESTS
// =============================================================================
