//! Process-level errors for the worker binary.

use crate::config::ConfigError;
use diver_core::RunError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize telemetry: {0}")]
    Telemetry(String),

    #[error("Failed to build client: {0}")]
    Client(#[from] RunError),

    #[error("Invocation {trigger_id} failed ({kind}): {message}")]
    InvocationFailed {
        trigger_id: Uuid,
        kind: String,
        message: String,
    },
}

pub type WorkerResult<T> = Result<T, WorkerError>;
