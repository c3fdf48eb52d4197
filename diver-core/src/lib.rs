//! DIVER Core - Relay Data Types
//!
//! Pure data structures shared by every diver crate: the remote session
//! model, deadline accounting, workflow input/output, and the error
//! taxonomy. This crate performs no I/O.

pub mod constants;
pub mod deadline;
pub mod error;
pub mod session;
pub mod workflow;

pub use deadline::{remaining, Budget, Deadline, DeadlineClock};
pub use error::{
    ArtifactKind, CompletionStage, ContractElement, InputViolation, RunError, RunResult,
};
pub use session::{
    Artifact, CompletionStatus, ContentItem, ExportState, OutputState, ParameterDefinition,
    ParameterKind, RemoteSession, SessionDocument, SessionId, VersionMap,
};
pub use workflow::{Candidate, ImageAsset, RunInput, RunOutput};
