//! Error types for vision fallback operations

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VisionError {
    /// Inference service unreachable or answered with a non-success status
    #[error("vision service unavailable: {0}")]
    Unavailable(String),

    /// No answer within the configured deadline
    #[error("vision request timed out after {0} ms")]
    Timeout(u64),

    /// Caller cancelled the request
    #[error("vision request cancelled")]
    Cancelled,

    /// Service answered but the payload could not be understood
    #[error("invalid vision response: {0}")]
    InvalidResponse(String),

    /// Screenshot or viewport could not be captured for the query
    #[error("capture failed: {0}")]
    Capture(String),
}

impl VisionError {
    /// Transient failures worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VisionError::Unavailable(_) | VisionError::Timeout(_))
    }

    /// The service was never successfully consulted.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            VisionError::Unavailable(_) | VisionError::Timeout(_) | VisionError::Capture(_)
        )
    }
}
