//! Core types for locator system

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use relocator_core_types::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LocatorError;

/// Locator strategy kinds.
///
/// Aliases accept the snake_case names older recordings were stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[serde(alias = "id")]
    Identifier,
    Name,
    #[serde(alias = "css")]
    CssSelector,
    #[serde(rename = "xpath")]
    XPath,
    #[serde(alias = "link_text")]
    LinkText,
    #[serde(alias = "partial_link_text")]
    PartialLinkText,
    #[serde(alias = "tag_name")]
    TagName,
    #[serde(alias = "class")]
    ClassName,
    #[serde(alias = "text_content", alias = "text")]
    TextContent,
    Coordinates,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 10] = [
        StrategyKind::Identifier,
        StrategyKind::Name,
        StrategyKind::CssSelector,
        StrategyKind::XPath,
        StrategyKind::LinkText,
        StrategyKind::PartialLinkText,
        StrategyKind::TagName,
        StrategyKind::ClassName,
        StrategyKind::TextContent,
        StrategyKind::Coordinates,
    ];

    /// Get strategy name as string
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Identifier => "identifier",
            StrategyKind::Name => "name",
            StrategyKind::CssSelector => "css-selector",
            StrategyKind::XPath => "xpath",
            StrategyKind::LinkText => "link-text",
            StrategyKind::PartialLinkText => "partial-link-text",
            StrategyKind::TagName => "tag-name",
            StrategyKind::ClassName => "class-name",
            StrategyKind::TextContent => "text-content",
            StrategyKind::Coordinates => "coordinates",
        }
    }

    /// Priority assigned when a strategy is recorded without one.
    pub fn default_priority(&self) -> u32 {
        match self {
            StrategyKind::Identifier => 10,
            StrategyKind::Name => 20,
            StrategyKind::CssSelector => 30,
            StrategyKind::XPath => 40,
            StrategyKind::LinkText => 50,
            StrategyKind::PartialLinkText => 60,
            StrategyKind::TagName => 70,
            StrategyKind::ClassName => 80,
            StrategyKind::TextContent => 90,
            StrategyKind::Coordinates => 100,
        }
    }

    /// Kinds allowed to break ties by preferring the expected tag name.
    pub fn has_tag_tie_break(&self) -> bool {
        matches!(self, StrategyKind::TextContent | StrategyKind::ClassName)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = LocatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(value.to_string())).map_err(|_| {
            LocatorError::InvalidStrategy {
                kind: value.to_string(),
                reason: "unknown strategy kind".to_string(),
            }
        })
    }
}

/// What a strategy matches on. Closed set: the resolver matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyTarget {
    Identifier(String),
    Name(String),
    CssSelector(String),
    XPath(String),
    LinkText(String),
    PartialLinkText(String),
    TagName(String),
    ClassName(String),
    TextContent(String),
    Coordinates(Point),
}

impl StrategyTarget {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyTarget::Identifier(_) => StrategyKind::Identifier,
            StrategyTarget::Name(_) => StrategyKind::Name,
            StrategyTarget::CssSelector(_) => StrategyKind::CssSelector,
            StrategyTarget::XPath(_) => StrategyKind::XPath,
            StrategyTarget::LinkText(_) => StrategyKind::LinkText,
            StrategyTarget::PartialLinkText(_) => StrategyKind::PartialLinkText,
            StrategyTarget::TagName(_) => StrategyKind::TagName,
            StrategyTarget::ClassName(_) => StrategyKind::ClassName,
            StrategyTarget::TextContent(_) => StrategyKind::TextContent,
            StrategyTarget::Coordinates(_) => StrategyKind::Coordinates,
        }
    }

    /// Textual value, `None` for coordinates.
    pub fn text_value(&self) -> Option<&str> {
        match self {
            StrategyTarget::Identifier(v)
            | StrategyTarget::Name(v)
            | StrategyTarget::CssSelector(v)
            | StrategyTarget::XPath(v)
            | StrategyTarget::LinkText(v)
            | StrategyTarget::PartialLinkText(v)
            | StrategyTarget::TagName(v)
            | StrategyTarget::ClassName(v)
            | StrategyTarget::TextContent(v) => Some(v.as_str()),
            StrategyTarget::Coordinates(_) => None,
        }
    }

    fn from_parts(kind: StrategyKind, value: Value) -> Result<Self, LocatorError> {
        let invalid = |reason: String| LocatorError::InvalidStrategy {
            kind: kind.name().to_string(),
            reason,
        };
        let text = match (kind, value) {
            (StrategyKind::Coordinates, value) => {
                return parse_point(&value).map(StrategyTarget::Coordinates).ok_or_else(|| {
                    invalid(format!("expected {{x, y}}, [x, y] or \"x,y\", got {value}"))
                })
            }
            (_, Value::String(text)) => text,
            (_, other) => return Err(invalid(format!("expected a string value, got {other}"))),
        };
        Ok(match kind {
            StrategyKind::Identifier => StrategyTarget::Identifier(text),
            StrategyKind::Name => StrategyTarget::Name(text),
            StrategyKind::CssSelector => StrategyTarget::CssSelector(text),
            StrategyKind::XPath => StrategyTarget::XPath(text),
            StrategyKind::LinkText => StrategyTarget::LinkText(text),
            StrategyKind::PartialLinkText => StrategyTarget::PartialLinkText(text),
            StrategyKind::TagName => StrategyTarget::TagName(text),
            StrategyKind::ClassName => StrategyTarget::ClassName(text),
            StrategyKind::TextContent | StrategyKind::Coordinates => {
                StrategyTarget::TextContent(text)
            }
        })
    }

    fn value_json(&self) -> Value {
        match self {
            StrategyTarget::Coordinates(point) => serde_json::json!({ "x": point.x, "y": point.y }),
            other => Value::String(other.text_value().unwrap_or_default().to_string()),
        }
    }
}

impl fmt::Display for StrategyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyTarget::Coordinates(point) => write!(f, "coordinates={point}"),
            other => write!(f, "{}={}", other.kind(), other.text_value().unwrap_or_default()),
        }
    }
}

fn parse_point(value: &Value) -> Option<Point> {
    let point = match value {
        Value::Object(map) => Point::new(map.get("x")?.as_f64()?, map.get("y")?.as_f64()?),
        Value::Array(items) if items.len() == 2 => {
            Point::new(items[0].as_f64()?, items[1].as_f64()?)
        }
        Value::String(raw) => {
            let (x, y) = raw.split_once(',')?;
            Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?)
        }
        _ => return None,
    };
    Some(point)
}

/// Outcome counters kept on each strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted: Option<DateTime<Utc>>,
}

impl StrategyStats {
    pub fn attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// 0.0 when the strategy has never been attempted.
    pub fn success_rate(&self) -> f64 {
        let total = self.attempts();
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// One way of finding the element, with its priority and outcome counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStrategy", into = "RawStrategy")]
pub struct LocatorStrategy {
    pub target: StrategyTarget,
    /// Lower tries first.
    pub priority: u32,
    pub stats: StrategyStats,
}

impl LocatorStrategy {
    pub fn new(target: StrategyTarget, priority: u32) -> Self {
        Self {
            target,
            priority,
            stats: StrategyStats::default(),
        }
    }

    pub fn with_default_priority(target: StrategyTarget) -> Self {
        let priority = target.kind().default_priority();
        Self::new(target, priority)
    }

    pub fn kind(&self) -> StrategyKind {
        self.target.kind()
    }

    pub fn is_coordinates(&self) -> bool {
        matches!(self.target, StrategyTarget::Coordinates(_))
    }

    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }
}

#[derive(Serialize, Deserialize)]
struct RawStrategy {
    kind: StrategyKind,
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<u32>,
    #[serde(flatten)]
    stats: StrategyStats,
}

impl TryFrom<RawStrategy> for LocatorStrategy {
    type Error = LocatorError;

    fn try_from(raw: RawStrategy) -> Result<Self, Self::Error> {
        let target = StrategyTarget::from_parts(raw.kind, raw.value)?;
        Ok(Self {
            priority: raw.priority.unwrap_or_else(|| raw.kind.default_priority()),
            target,
            stats: raw.stats,
        })
    }
}

impl From<LocatorStrategy> for RawStrategy {
    fn from(strategy: LocatorStrategy) -> Self {
        Self {
            kind: strategy.kind(),
            value: strategy.target.value_json(),
            priority: Some(strategy.priority),
            stats: strategy.stats,
        }
    }
}

/// Properties the element was recorded with, used for tie-breaks and the
/// vision query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ExpectedProperties {
    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.attributes.is_empty()
    }
}

/// Where the element lived when it was recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementContext {
    /// Shadow host identifiers from outermost to innermost.
    #[serde(default)]
    pub shadow_path: Vec<String>,
    /// Frame indices from the top document inwards.
    #[serde(default)]
    pub frame_path: Vec<usize>,
}

impl ElementContext {
    pub fn in_shadow_root(&self) -> bool {
        !self.shadow_path.is_empty()
    }

    pub fn in_frame(&self) -> bool {
        !self.frame_path.is_empty()
    }

    pub fn is_light_dom(&self) -> bool {
        !self.in_shadow_root() && !self.in_frame()
    }

    pub fn path(&self) -> ContextPath {
        ContextPath {
            frame_path: self.frame_path.clone(),
            shadow_path: self.shadow_path.clone(),
        }
    }
}

/// Stable identity of a search root: frames entered from the top document,
/// then shadow hosts descended inside the innermost frame's document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextPath {
    #[serde(default)]
    pub frame_path: Vec<usize>,
    #[serde(default)]
    pub shadow_path: Vec<String>,
}

impl ContextPath {
    pub fn document() -> Self {
        Self::default()
    }

    /// Light DOM of the top-level document.
    pub fn is_top_document(&self) -> bool {
        self.frame_path.is_empty() && self.shadow_path.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frame_path.len() + self.shadow_path.len()
    }

    pub fn child_frame(&self, index: usize) -> Self {
        let mut frame_path = self.frame_path.clone();
        frame_path.push(index);
        Self {
            frame_path,
            shadow_path: Vec::new(),
        }
    }

    pub fn child_shadow(&self, host_key: &str) -> Self {
        let mut shadow_path = self.shadow_path.clone();
        shadow_path.push(host_key.to_string());
        Self {
            frame_path: self.frame_path.clone(),
            shadow_path,
        }
    }

    /// True when `other` is this root or lies inside it. Shadow steps only
    /// carry over within the same frame.
    pub fn encloses(&self, other: &ContextPath) -> bool {
        if !other.frame_path.starts_with(&self.frame_path) {
            return false;
        }
        if self.frame_path.len() < other.frame_path.len() {
            return self.shadow_path.is_empty();
        }
        other.shadow_path.starts_with(&self.shadow_path)
    }
}

impl fmt::Display for ContextPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_top_document() {
            return f.write_str("document");
        }
        let mut first = true;
        for index in &self.frame_path {
            if !first {
                f.write_str("/")?;
            }
            write!(f, "frame[{index}]")?;
            first = false;
        }
        if first {
            f.write_str("document")?;
        }
        for host in &self.shadow_path {
            write!(f, ">shadow({host})")?;
        }
        Ok(())
    }
}

/// What produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AttemptMethod {
    Strategy(StrategyKind),
    /// Entering or enumerating a context, before any strategy ran.
    Context,
    Vision,
}

impl fmt::Display for AttemptMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptMethod::Strategy(kind) => f.write_str(kind.name()),
            AttemptMethod::Context => f.write_str("context"),
            AttemptMethod::Vision => f.write_str("vision"),
        }
    }
}

impl From<AttemptMethod> for String {
    fn from(method: AttemptMethod) -> Self {
        method.to_string()
    }
}

impl TryFrom<String> for AttemptMethod {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "context" => Ok(AttemptMethod::Context),
            "vision" => Ok(AttemptMethod::Vision),
            other => other.parse().map(AttemptMethod::Strategy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Matched,
    NoMatch,
    Ambiguous { count: usize },
    ContextUnreachable { reason: String },
    Errored { message: String },
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, AttemptOutcome::Matched)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Matched => "matched",
            AttemptOutcome::NoMatch => "no-match",
            AttemptOutcome::Ambiguous { .. } => "ambiguous",
            AttemptOutcome::ContextUnreachable { .. } => "context-unreachable",
            AttemptOutcome::Errored { .. } => "errored",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }
}

/// Record of one strategy (or context, or vision) attempt within a single
/// resolution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    pub method: AttemptMethod,
    pub path: ContextPath,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    /// Matches discarded because they were not displayed.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hidden_matches: usize,
    pub elapsed_ms: u64,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl ResolutionAttempt {
    pub fn new(method: AttemptMethod, path: ContextPath, outcome: AttemptOutcome) -> Self {
        Self {
            method,
            path,
            outcome,
            hidden_matches: 0,
            elapsed_ms: 0,
        }
    }

    pub fn unreachable(path: ContextPath, reason: impl Into<String>) -> Self {
        Self::new(
            AttemptMethod::Context,
            path,
            AttemptOutcome::ContextUnreachable {
                reason: reason.into(),
            },
        )
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn with_hidden_matches(mut self, hidden: usize) -> Self {
        self.hidden_matches = hidden;
        self
    }

    pub fn strategy_kind(&self) -> Option<StrategyKind> {
        match self.method {
            AttemptMethod::Strategy(kind) => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enclosing_paths_follow_frames_then_shadows() {
        let frame = ContextPath::document().child_frame(1);
        let widget = frame.child_shadow("pay-widget");
        assert!(frame.encloses(&widget));
        assert!(widget.encloses(&widget));
        assert!(!widget.encloses(&frame));
        assert!(!ContextPath::document().child_frame(0).encloses(&widget));

        let host = ContextPath::document().child_shadow("app-shell");
        assert!(!host.encloses(&host.child_frame(0)));
        assert!(ContextPath::document().encloses(&widget));
    }

    #[test]
    fn strategy_reads_legacy_kind_names_and_default_priority() {
        let strategy: LocatorStrategy =
            serde_json::from_value(json!({ "kind": "id", "value": "search-btn" }))
                .unwrap();
        assert_eq!(strategy.target, StrategyTarget::Identifier("search-btn".into()));
        assert_eq!(strategy.priority, 10);

        let strategy: LocatorStrategy =
            serde_json::from_value(json!({ "kind": "text_content", "value": "Search", "priority": 5 }))
                .unwrap();
        assert_eq!(strategy.kind(), StrategyKind::TextContent);
        assert_eq!(strategy.priority, 5);
    }

    #[test]
    fn coordinates_accept_object_array_and_string_forms() {
        for value in [json!({ "x": 1575, "y": 14 }), json!([1575, 14]), json!("1575, 14")] {
            let strategy: LocatorStrategy =
                serde_json::from_value(json!({ "kind": "coordinates", "value": value })).unwrap();
            assert_eq!(strategy.target, StrategyTarget::Coordinates(Point::new(1575.0, 14.0)));
            assert_eq!(strategy.priority, 100);
        }
    }

    #[test]
    fn strategy_rejects_non_string_values() {
        let err = serde_json::from_value::<LocatorStrategy>(json!({ "kind": "xpath", "value": 3 }))
            .unwrap_err();
        assert!(err.to_string().contains("expected a string value"));
    }

    #[test]
    fn strategy_serializes_counters_next_to_kind() {
        let mut strategy = LocatorStrategy::with_default_priority(StrategyTarget::ClassName(
            "search-button".into(),
        ));
        strategy.stats.failure_count = 2;
        let value = serde_json::to_value(&strategy).unwrap();
        assert_eq!(value["kind"], "class-name");
        assert_eq!(value["value"], "search-button");
        assert_eq!(value["priority"], 80);
        assert_eq!(value["failure_count"], 2);
        assert!(value.get("last_attempted").is_none());
    }

    #[test]
    fn success_rate_is_zero_before_any_attempt() {
        let mut stats = StrategyStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        stats.success_count = 3;
        stats.failure_count = 1;
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn context_path_display() {
        assert_eq!(ContextPath::document().to_string(), "document");
        let path = ContextPath::document()
            .child_shadow("app-shell")
            .child_shadow("search-box");
        assert_eq!(path.to_string(), "document>shadow(app-shell)>shadow(search-box)");
        let framed = ContextPath::document().child_frame(0).child_frame(2).child_shadow("x");
        assert_eq!(framed.to_string(), "frame[0]/frame[2]>shadow(x)");
        assert_eq!(framed.depth(), 3);
    }

    #[test]
    fn attempt_serializes_method_and_status_flat() {
        let attempt = ResolutionAttempt::new(
            AttemptMethod::Strategy(StrategyKind::Identifier),
            ContextPath::document(),
            AttemptOutcome::Ambiguous { count: 2 },
        )
        .with_elapsed_ms(3);
        let value = serde_json::to_value(&attempt).unwrap();
        assert_eq!(value["method"], "identifier");
        assert_eq!(value["status"], "ambiguous");
        assert_eq!(value["count"], 2);

        let back: ResolutionAttempt = serde_json::from_value(value).unwrap();
        assert_eq!(back, attempt);
    }

    #[test]
    fn kind_parses_from_str() {
        assert_eq!("class".parse::<StrategyKind>().unwrap(), StrategyKind::ClassName);
        assert_eq!("xpath".parse::<StrategyKind>().unwrap(), StrategyKind::XPath);
        assert!("bogus".parse::<StrategyKind>().is_err());
    }
}
