mod http;

pub use http::HttpBackend;

use crate::model::{FailureClass, GenerationRequest, GenerationResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Status a backend uses to report that it saw the caller close the request.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Failure of a single generation call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The caller's cancellation token fired before the call settled.
    #[error("Request aborted")]
    Cancelled,

    #[error("Client Closed Request")]
    ClientClosed,

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("{0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn classify(&self) -> FailureClass {
        match self {
            BackendError::Cancelled | BackendError::ClientClosed => FailureClass::ClientAbort,
            BackendError::Rejected { .. } => FailureClass::NonRetryable,
            BackendError::Server { .. }
            | BackendError::Transport(_)
            | BackendError::Malformed(_) => FailureClass::Retryable,
        }
    }

    /// Map a non-2xx status and its message to the matching error.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            CLIENT_CLOSED_REQUEST => BackendError::ClientClosed,
            500..=599 => BackendError::Server { status, message },
            _ => BackendError::Rejected { status, message },
        }
    }
}

/// A generation backend. Implementations must stop work promptly once
/// `cancel` fires; the controller additionally drops the call future.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, BackendError>;
}
