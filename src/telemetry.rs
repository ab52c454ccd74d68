//! Logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::errors::RelocateError;

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str, json: bool) -> Result<(), RelocateError> {
    let level: tracing::Level = level
        .trim()
        .parse()
        .map_err(|_| RelocateError::Logging(format!("invalid log level '{level}'")))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|err| RelocateError::Logging(err.to_string()))
}

pub fn init_from_settings(settings: &LoggingSettings) -> Result<(), RelocateError> {
    init_logging(&settings.level, settings.json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_levels() {
        assert!(matches!(
            init_logging("chatty", false),
            Err(RelocateError::Logging(_))
        ));
    }
}
