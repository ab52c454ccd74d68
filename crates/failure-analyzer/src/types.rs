//! Analysis result types

use std::fmt;

use chrono::{DateTime, Utc};
use relocator_core_types::Point;
use serde::{Deserialize, Serialize};

/// Root-cause category of a failed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RootCause {
    ElementNotFound,
    ElementMoved,
    ElementHidden,
    TimingNotYetLoaded,
    BlockedByOverlay,
    NetworkError,
    ScriptError,
    ResponsiveLayoutChange,
    AuthenticationRequired,
    StaleTestData,
    /// Closed shadow root or cross-origin frame in the way.
    ContextUnreachable,
    Unknown,
}

impl RootCause {
    pub fn name(&self) -> &'static str {
        match self {
            RootCause::ElementNotFound => "element-not-found",
            RootCause::ElementMoved => "element-moved",
            RootCause::ElementHidden => "element-hidden",
            RootCause::TimingNotYetLoaded => "timing-not-yet-loaded",
            RootCause::BlockedByOverlay => "blocked-by-overlay",
            RootCause::NetworkError => "network-error",
            RootCause::ScriptError => "script-error",
            RootCause::ResponsiveLayoutChange => "responsive-layout-change",
            RootCause::AuthenticationRequired => "authentication-required",
            RootCause::StaleTestData => "stale-test-data",
            RootCause::ContextUnreachable => "context-unreachable",
            RootCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RootCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_change: Option<String>,
    pub priority: FixPriority,
    pub confidence: f64,
    pub effort: Effort,
    /// Carries a concrete locator proposed by the vision service.
    #[serde(default)]
    pub backed_by_locator: bool,
}

impl FixSuggestion {
    pub fn new(description: impl Into<String>, priority: FixPriority, confidence: f64) -> Self {
        Self {
            description: description.into(),
            code_change: None,
            priority,
            confidence,
            effort: Effort::Medium,
            backed_by_locator: false,
        }
    }

    pub fn with_code_change(mut self, change: impl Into<String>) -> Self {
        self.code_change = Some(change.into());
        self
    }

    pub fn with_effort(mut self, effort: Effort) -> Self {
        self.effort = effort;
        self
    }

    pub fn backed_by_locator(mut self) -> Self {
        self.backed_by_locator = true;
        self
    }
}

/// Where the vision service placed the element, even though the answer
/// was not accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementLocation {
    pub point: Point,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub root_cause: RootCause,
    pub diagnosis: String,
    pub confidence: f64,
    #[serde(default)]
    pub what_changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_location: Option<ElementLocation>,
    /// Ranked, best first.
    #[serde(default)]
    pub fixes: Vec<FixSuggestion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl FailureAnalysis {
    pub fn best_fix(&self) -> Option<&FixSuggestion> {
        self.fixes.first()
    }
}

/// Tier first, then locator-backed suggestions, then confidence.
pub fn rank_fixes(fixes: &mut [FixSuggestion]) {
    fixes.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.backed_by_locator.cmp(&a.backed_by_locator))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });
}
