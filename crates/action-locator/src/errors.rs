//! Error types for locator system

use thiserror::Error;

/// Errors reported by a browser driver implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DriverError {
    /// Selector or XPath rejected by the driver
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// Handle used outside of the frame context it belongs to
    #[error("stale context: {0}")]
    StaleContext(String),

    /// Frame index does not exist in the current document
    #[error("no such frame: {0}")]
    NoSuchFrame(usize),

    /// Frame exists but its document is not script-accessible
    #[error("frame {0} is cross-origin")]
    CrossOrigin(usize),

    /// Script evaluation failed inside the page
    #[error("script error: {0}")]
    Script(String),

    /// Session lost or transport failure
    #[error("driver disconnected: {0}")]
    Disconnected(String),

    /// Driver call exceeded its deadline
    #[error("driver timeout: {0}")]
    Timeout(String),
}

impl DriverError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Timeout(_) | DriverError::StaleContext(_))
    }
}

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// Descriptor failed validation
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A single strategy carries an unusable value
    #[error("invalid strategy '{kind}': {reason}")]
    InvalidStrategy { kind: String, reason: String },

    /// Driver failure that aborts resolution
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Declared context cannot be entered
    #[error("context unreachable at {path}: {reason}")]
    ContextUnreachable { path: String, reason: String },

    /// Every root and strategy was tried without a unique match
    #[error("all strategies exhausted for '{0}'")]
    AllStrategiesExhausted(String),

    /// Descriptor JSON could not be read or written
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LocatorError::Driver(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Driver(DriverError::Disconnected(_)) => 3,
            LocatorError::Driver(_) | LocatorError::Serialization(_) => 2,
            LocatorError::AllStrategiesExhausted(_) | LocatorError::ContextUnreachable { .. } => 1,
            LocatorError::InvalidDescriptor(_) | LocatorError::InvalidStrategy { .. } => 0,
        }
    }
}

impl From<serde_json::Error> for LocatorError {
    fn from(err: serde_json::Error) -> Self {
        LocatorError::Serialization(err.to_string())
    }
}
