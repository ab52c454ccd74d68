//! Error handling module

use action_locator::{DriverError, LocatorError};
use perceiver_visual::VisionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("invalid descriptor: {0}")]
    Descriptor(String),

    /// The session itself is broken, not just one context or strategy.
    #[error("browser driver failed: {0}")]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Locator(LocatorError),

    #[error("vision client setup failed: {0}")]
    Vision(#[from] VisionError),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl From<LocatorError> for RelocateError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::Driver(driver) => RelocateError::Driver(driver),
            LocatorError::InvalidDescriptor(reason) => RelocateError::Descriptor(reason),
            LocatorError::InvalidStrategy { kind, reason } => {
                RelocateError::Descriptor(format!("{kind}: {reason}"))
            }
            other => RelocateError::Locator(other),
        }
    }
}

impl RelocateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RelocateError::Driver(err) => err.is_retryable(),
            RelocateError::Locator(err) => err.is_retryable(),
            RelocateError::Vision(err) => err.is_retryable(),
            _ => false,
        }
    }
}
