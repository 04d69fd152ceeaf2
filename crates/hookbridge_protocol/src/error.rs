//! Error taxonomy shared across every hookbridge crate.
//!
//! One enum, composed upward via `#[from]` the way sibling crates in this
//! workspace each keep a single `thiserror` type at their boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unauthorized: {operation}")]
    Unauthorized { operation: String },

    #[error("no worker available for {0}")]
    NoWorker(String),

    #[error("worker {worker} overloaded")]
    Overloaded { worker: String },

    #[error("operation on {worker} timed out after {elapsed_ms}ms")]
    Timeout { worker: String, elapsed_ms: u64 },

    #[error("circuit open for {worker}/{operation}")]
    CircuitOpen { worker: String, operation: String },

    #[error("worker {worker} returned an error: {message}")]
    WorkerError { worker: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("service is shutting down")]
    Shutdown,

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// The stable `kind` tag carried on every failure response (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::BadRequest(_) => "BadRequest",
            ProtocolError::Unauthenticated => "Unauthenticated",
            ProtocolError::Unauthorized { .. } => "Unauthorized",
            ProtocolError::NoWorker(_) => "NoWorker",
            ProtocolError::Overloaded { .. } => "Overloaded",
            ProtocolError::Timeout { .. } => "Timeout",
            ProtocolError::CircuitOpen { .. } => "CircuitOpen",
            ProtocolError::WorkerError { .. } => "WorkerError",
            ProtocolError::Internal(_) => "Internal",
            ProtocolError::Shutdown => "Shutdown",
            ProtocolError::Json(_) => "BadRequest",
        }
    }

    /// Whether the caller may usefully retry against a fallback worker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::Overloaded { .. }
                | ProtocolError::Timeout { .. }
                | ProtocolError::CircuitOpen { .. }
                | ProtocolError::Shutdown
        )
    }
}
