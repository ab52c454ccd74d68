//! Per-kind matching rules.
//!
//! The driver narrows candidates with a scoped query; these rules then decide
//! which candidates actually satisfy the strategy and how ties are broken.

use crate::driver::{ElementHandle, ElementInfo, ElementQuery};
use crate::types::{ExpectedProperties, StrategyKind, StrategyTarget};

/// Driver query for a strategy. Coordinates use a point lookup instead.
pub fn query_for(target: &StrategyTarget) -> Option<ElementQuery> {
    let query = match target {
        StrategyTarget::Identifier(v) => ElementQuery::Id(v.clone()),
        StrategyTarget::Name(v) => ElementQuery::Name(v.clone()),
        StrategyTarget::CssSelector(v) => ElementQuery::Css(v.clone()),
        StrategyTarget::XPath(v) => ElementQuery::XPath(v.clone()),
        StrategyTarget::LinkText(v) => ElementQuery::LinkText(normalize_text(v)),
        StrategyTarget::PartialLinkText(v) => ElementQuery::PartialLinkText(normalize_text(v)),
        StrategyTarget::TagName(v) => ElementQuery::TagName(v.trim().to_ascii_lowercase()),
        StrategyTarget::ClassName(v) => ElementQuery::ClassName(v.trim().to_string()),
        StrategyTarget::TextContent(v) => ElementQuery::Text(normalize_text(v)),
        StrategyTarget::Coordinates(_) => return None,
    };
    Some(query)
}

/// Collapse runs of whitespace and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How well a described candidate satisfies a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fit {
    Reject,
    Partial,
    Exact,
}

pub fn fit(target: &StrategyTarget, info: &ElementInfo) -> Fit {
    let accept = |ok: bool| if ok { Fit::Exact } else { Fit::Reject };
    match target {
        StrategyTarget::Identifier(v) => accept(info.attribute("id") == Some(v.as_str())),
        StrategyTarget::Name(v) => accept(info.attribute("name") == Some(v.as_str())),
        StrategyTarget::ClassName(v) => {
            let token = v.trim();
            accept(info.classes().any(|class| class == token))
        }
        StrategyTarget::TagName(v) => accept(info.has_tag(v.trim())),
        // Structural queries are trusted as returned by the driver.
        StrategyTarget::CssSelector(_) | StrategyTarget::XPath(_) => Fit::Exact,
        StrategyTarget::LinkText(v) => {
            accept(info.is_anchor_like() && normalize_text(&info.text) == normalize_text(v))
        }
        StrategyTarget::PartialLinkText(v) => {
            let needle = normalize_text(v);
            accept(info.is_anchor_like() && !needle.is_empty() && normalize_text(&info.text).contains(&needle))
        }
        StrategyTarget::TextContent(v) => {
            let needle = normalize_text(v);
            let text = normalize_text(&info.text);
            if needle.is_empty() {
                Fit::Reject
            } else if text == needle {
                Fit::Exact
            } else if text.contains(&needle) {
                Fit::Partial
            } else {
                Fit::Reject
            }
        }
        StrategyTarget::Coordinates(_) => accept(true),
    }
}

/// Result of applying a kind rule to the displayed candidates of one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Unique(ElementHandle),
    None,
    Ambiguous(usize),
}

/// Choose among displayed candidates that passed [`fit`].
///
/// Exact fits win over partial ones. Kinds with a tag tie-break resolve
/// multiple candidates only when exactly one carries the expected tag.
pub fn select(
    kind: StrategyKind,
    candidates: Vec<(ElementHandle, ElementInfo, Fit)>,
    expected: &ExpectedProperties,
) -> Selection {
    let best = candidates
        .iter()
        .map(|(_, _, fit)| *fit)
        .max()
        .unwrap_or(Fit::Reject);
    if best == Fit::Reject {
        return Selection::None;
    }
    let mut pool: Vec<(ElementHandle, ElementInfo)> = candidates
        .into_iter()
        .filter(|(_, _, fit)| *fit == best)
        .map(|(handle, info, _)| (handle, info))
        .collect();

    if pool.len() == 1 {
        return pool.pop().map(|(handle, _)| Selection::Unique(handle)).unwrap_or(Selection::None);
    }

    let count = pool.len();
    if kind.has_tag_tie_break() {
        if let Some(tag) = expected.tag.as_deref() {
            let mut tagged: Vec<ElementHandle> = pool
                .into_iter()
                .filter(|(_, info)| info.has_tag(tag))
                .map(|(handle, _)| handle)
                .collect();
            if tagged.len() == 1 {
                return tagged.pop().map(Selection::Unique).unwrap_or(Selection::None);
            }
        }
    }
    Selection::Ambiguous(count)
}
