//! Browser driver capability port.
//!
//! The locator never talks to a concrete automation library. Everything it
//! needs from a live browser session goes through [`BrowserDriver`]: scoped
//! element queries, shadow host and frame enumeration, frame switching,
//! screenshots and point lookups. Frame switching is stateful on the driver
//! side, so callers must always return to the default content when done.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use relocator_core_types::{Point, Rect, Screenshot, Viewport};
use serde::{Deserialize, Serialize};

use crate::errors::DriverError;

/// Opaque reference to a live element.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle(pub String);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a document or shadow root used as a query scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootHandle(pub String);

impl fmt::Display for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query shapes the driver must support inside a single root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementQuery {
    Id(String),
    Name(String),
    Css(String),
    XPath(String),
    LinkText(String),
    PartialLinkText(String),
    TagName(String),
    ClassName(String),
    /// Elements whose own normalized text contains the needle.
    Text(String),
}

impl ElementQuery {
    pub fn label(&self) -> &'static str {
        match self {
            ElementQuery::Id(_) => "id",
            ElementQuery::Name(_) => "name",
            ElementQuery::Css(_) => "css",
            ElementQuery::XPath(_) => "xpath",
            ElementQuery::LinkText(_) => "link-text",
            ElementQuery::PartialLinkText(_) => "partial-link-text",
            ElementQuery::TagName(_) => "tag-name",
            ElementQuery::ClassName(_) => "class-name",
            ElementQuery::Text(_) => "text",
        }
    }
}

/// Snapshot of the properties the resolver needs to judge a match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag_name: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub displayed: bool,
    pub rect: Option<Rect>,
}

impl ElementInfo {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attribute("class")
            .unwrap_or_default()
            .split_whitespace()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_name.eq_ignore_ascii_case(tag)
    }

    /// Anchors, image-map areas and anything exposing the link role.
    pub fn is_anchor_like(&self) -> bool {
        self.has_tag("a")
            || self.has_tag("area")
            || self
                .attribute("role")
                .map(|role| role.eq_ignore_ascii_case("link"))
                .unwrap_or(false)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowMode {
    Open,
    Closed,
}

/// Element hosting a shadow root, as reported by the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowHost {
    pub element: ElementHandle,
    /// Stable identifier used in recorded shadow paths (e.g. `app-shell#main`).
    pub key: String,
    pub mode: ShadowMode,
}

/// Child browsing context of a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Index usable with [`BrowserDriver::switch_to_frame`] from the owning document.
    pub index: usize,
    pub same_origin: bool,
    pub src: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warning,
    Severe,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
}

impl ConsoleMessage {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Root of the document in the current frame context.
    async fn document_root(&self) -> Result<RootHandle, DriverError>;

    /// Elements matching `query` inside `root`, in document order. Never
    /// crosses into shadow roots or child frames.
    async fn find_elements(
        &self,
        root: &RootHandle,
        query: &ElementQuery,
    ) -> Result<Vec<ElementHandle>, DriverError>;

    async fn describe(&self, element: &ElementHandle) -> Result<ElementInfo, DriverError>;

    /// Elements inside `root` that carry a shadow root, open or closed.
    async fn shadow_hosts(&self, root: &RootHandle) -> Result<Vec<ShadowHost>, DriverError>;

    /// Shadow root of `host`; `None` when closed or detached.
    async fn shadow_root(&self, host: &ElementHandle) -> Result<Option<RootHandle>, DriverError>;

    /// Child frames of the document owning `root`.
    async fn frames(&self, root: &RootHandle) -> Result<Vec<FrameInfo>, DriverError>;

    /// Enter a child frame of the current document.
    async fn switch_to_frame(&self, index: usize) -> Result<(), DriverError>;

    async fn switch_to_default(&self) -> Result<(), DriverError>;

    async fn screenshot(&self) -> Result<Screenshot, DriverError>;

    async fn viewport(&self) -> Result<Viewport, DriverError>;

    /// Top-most element painted at `point` in the top-level document.
    async fn element_at_point(&self, point: Point) -> Result<Option<ElementHandle>, DriverError>;

    async fn current_url(&self) -> Result<Option<String>, DriverError> {
        Ok(None)
    }

    async fn console_messages(&self) -> Result<Vec<ConsoleMessage>, DriverError> {
        Ok(Vec::new())
    }

    async fn ready_state(&self) -> Result<ReadyState, DriverError> {
        Ok(ReadyState::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(tag: &str, attrs: &[(&str, &str)]) -> ElementInfo {
        ElementInfo {
            tag_name: tag.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            displayed: true,
            ..ElementInfo::default()
        }
    }

    #[test]
    fn anchor_like_covers_role_link() {
        assert!(info("A", &[]).is_anchor_like());
        assert!(info("area", &[]).is_anchor_like());
        assert!(info("span", &[("role", "Link")]).is_anchor_like());
        assert!(!info("button", &[]).is_anchor_like());
    }

    #[test]
    fn classes_split_on_whitespace() {
        let element = info("button", &[("class", "search-button  new-style")]);
        let classes: Vec<_> = element.classes().collect();
        assert_eq!(classes, vec!["search-button", "new-style"]);
    }
}
