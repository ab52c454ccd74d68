//! Relocator configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.
//! `RELOCATOR_*` environment variables override file values.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use action_locator::NavigatorLimits;
use perceiver_visual::{http, AcceptancePolicy, HttpVisionConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::RelocateError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocatorConfig {
    pub navigator: NavigatorLimits,
    pub vision: VisionSettings,
    pub cache: CacheSettings,
    pub analysis: AnalysisSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub retries: u32,
    /// Unset means any non-negative confidence is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: http::DEFAULT_ENDPOINT.to_string(),
            model: http::DEFAULT_MODEL.to_string(),
            timeout_ms: 30_000,
            retries: 1,
            min_confidence: None,
        }
    }
}

impl VisionSettings {
    pub fn http_config(&self) -> HttpVisionConfig {
        HttpVisionConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
        }
    }

    pub fn acceptance(&self) -> AcceptancePolicy {
        AcceptancePolicy {
            min_confidence: self.min_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Gather console, URL and ready state for failed resolutions. Failures
    /// are classified either way.
    #[serde(alias = "enabled")]
    pub page_signals: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self { page_signals: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RelocatorConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, RelocateError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Read `path`, falling back to defaults when it does not exist, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, RelocateError> {
        let mut config = if path.exists() {
            Self::from_yaml_str(&fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, RelocateError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Overrides from an arbitrary lookup; unparsable values are logged and
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        override_parsed(&read, "RELOCATOR_MAX_DEPTH", &mut self.navigator.max_depth);
        override_parsed(&read, "RELOCATOR_MAX_ROOTS", &mut self.navigator.max_roots);
        override_flag(&read, "RELOCATOR_VISION_ENABLED", &mut self.vision.enabled);
        if let Some(endpoint) = read("RELOCATOR_VISION_ENDPOINT") {
            self.vision.endpoint = endpoint;
        }
        if let Some(model) = read("RELOCATOR_VISION_MODEL") {
            self.vision.model = model;
        }
        override_parsed(&read, "RELOCATOR_VISION_TIMEOUT_MS", &mut self.vision.timeout_ms);
        override_parsed(&read, "RELOCATOR_VISION_RETRIES", &mut self.vision.retries);
        if let Some(raw) = read("RELOCATOR_MIN_CONFIDENCE") {
            match raw.parse::<f64>() {
                Ok(value) if (0.0..=1.0).contains(&value) => self.vision.min_confidence = Some(value),
                _ => warn!(value = %raw, "invalid RELOCATOR_MIN_CONFIDENCE value"),
            }
        }
        override_flag(&read, "RELOCATOR_CACHE_ENABLED", &mut self.cache.enabled);
        override_flag(&read, "RELOCATOR_PAGE_SIGNALS", &mut self.analysis.page_signals);
        if let Some(level) = read("RELOCATOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_flag(&read, "RELOCATOR_LOG_JSON", &mut self.logging.json);
    }
}

fn override_parsed<T, F>(read: &F, key: &str, target: &mut T)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = read(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}

fn override_flag<F>(read: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = read(key) {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            _ => warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}
