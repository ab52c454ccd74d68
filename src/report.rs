//! Resolution results handed back to callers.

use std::fmt;

use action_locator::{ContextPath, ElementHandle, ResolutionAttempt, StrategyKind, TrackerSummary};
use failure_analyzer::FailureAnalysis;
use perceiver_visual::VisionResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Matched,
    VisionMatched,
    Failed,
    Cancelled,
}

/// What produced the element: a strategy kind, `vision`, or `none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ResolutionMethod {
    Strategy(StrategyKind),
    Vision,
    None,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMethod::Strategy(kind) => f.write_str(kind.name()),
            ResolutionMethod::Vision => f.write_str("vision"),
            ResolutionMethod::None => f.write_str("none"),
        }
    }
}

impl From<ResolutionMethod> for String {
    fn from(method: ResolutionMethod) -> Self {
        method.to_string()
    }
}

impl TryFrom<String> for ResolutionMethod {
    type Error = action_locator::LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "vision" => Ok(ResolutionMethod::Vision),
            "none" => Ok(ResolutionMethod::None),
            other => other.parse().map(ResolutionMethod::Strategy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub description: String,
    pub outcome: ResolutionOutcome,
    pub method: ResolutionMethod,
    /// Root the element was found in; always the top document for vision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<ContextPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementHandle>,
    pub attempts: Vec<ResolutionAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<FailureAnalysis>,
    pub tracker: TrackerSummary,
    pub elapsed_ms: u64,
}

impl ResolutionReport {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.outcome,
            ResolutionOutcome::Matched | ResolutionOutcome::VisionMatched
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
