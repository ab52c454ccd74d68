//! Recorded element descriptors.
//!
//! A [`LocatorDescriptor`] is everything the capture stage knew about an
//! element: its strategies, a free-text description for the vision fallback,
//! and the context (shadow hosts, frames) it lived in.

use std::collections::HashSet;

use relocator_core_types::Point;
use serde::{Deserialize, Serialize};

use crate::errors::LocatorError;
use crate::types::{
    ElementContext, ExpectedProperties, LocatorStrategy, StrategyKind, StrategyTarget,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorDescriptor {
    pub description: String,
    #[serde(default)]
    pub strategies: Vec<LocatorStrategy>,
    #[serde(default)]
    pub context: ElementContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visual_cues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nearby_elements: Vec<String>,
    #[serde(default, skip_serializing_if = "ExpectedProperties::is_empty")]
    pub expected: ExpectedProperties,
    /// Structural locator the vision service proposed on its last accepted match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_suggestion: Option<String>,
}

impl LocatorDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            strategies: Vec::new(),
            context: ElementContext::default(),
            visual_cues: Vec::new(),
            nearby_elements: Vec::new(),
            expected: ExpectedProperties::default(),
            vision_suggestion: None,
        }
    }

    pub fn builder(description: impl Into<String>) -> LocatorDescriptorBuilder {
        LocatorDescriptorBuilder {
            descriptor: Self::new(description),
        }
    }

    /// Parse and validate a persisted descriptor.
    pub fn from_json(json: &str) -> Result<Self, LocatorError> {
        let descriptor: Self = serde_json::from_str(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn to_json(&self) -> Result<String, LocatorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject descriptors the resolver could not act on.
    pub fn validate(&self) -> Result<(), LocatorError> {
        if self.strategies.is_empty() && self.description.trim().is_empty() {
            return Err(LocatorError::InvalidDescriptor(
                "descriptor needs at least one strategy or a description".to_string(),
            ));
        }

        let mut seen_points: HashSet<(u64, u64)> = HashSet::new();
        for strategy in &self.strategies {
            match &strategy.target {
                StrategyTarget::Coordinates(point) => {
                    if !point.is_finite() {
                        return Err(LocatorError::InvalidStrategy {
                            kind: StrategyKind::Coordinates.name().to_string(),
                            reason: format!("non-finite point {point}"),
                        });
                    }
                    if !seen_points.insert((point.x.to_bits(), point.y.to_bits())) {
                        return Err(LocatorError::InvalidStrategy {
                            kind: StrategyKind::Coordinates.name().to_string(),
                            reason: format!("duplicate point {point}"),
                        });
                    }
                }
                other => {
                    if other.text_value().map(str::trim).unwrap_or_default().is_empty() {
                        return Err(LocatorError::InvalidStrategy {
                            kind: other.kind().name().to_string(),
                            reason: "empty value".to_string(),
                        });
                    }
                }
            }
        }

        if self.context.shadow_path.iter().any(|host| host.trim().is_empty()) {
            return Err(LocatorError::InvalidDescriptor(
                "shadow path contains an empty host".to_string(),
            ));
        }
        Ok(())
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<&LocatorStrategy> {
        self.strategies.iter().find(|strategy| strategy.kind() == kind)
    }

    pub fn has_coordinates(&self) -> bool {
        self.strategies.iter().any(LocatorStrategy::is_coordinates)
    }

    /// Keep the locator the vision service proposed so the capture stage can
    /// promote it to a structural strategy later.
    pub fn record_vision_suggestion(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        let trimmed = suggestion.trim();
        if trimmed.is_empty() {
            return;
        }
        self.vision_suggestion = Some(trimmed.to_string());
    }
}

/// Fluent construction of descriptors; each strategy call takes the kind's
/// default priority unless followed by [`LocatorDescriptorBuilder::priority`].
#[derive(Debug, Clone)]
pub struct LocatorDescriptorBuilder {
    descriptor: LocatorDescriptor,
}

impl LocatorDescriptorBuilder {
    pub fn strategy(mut self, strategy: LocatorStrategy) -> Self {
        self.descriptor.strategies.push(strategy);
        self
    }

    fn target(self, target: StrategyTarget) -> Self {
        self.strategy(LocatorStrategy::with_default_priority(target))
    }

    pub fn id(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::Identifier(value.into()))
    }

    pub fn name(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::Name(value.into()))
    }

    pub fn css(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::CssSelector(value.into()))
    }

    pub fn xpath(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::XPath(value.into()))
    }

    pub fn link_text(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::LinkText(value.into()))
    }

    pub fn partial_link_text(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::PartialLinkText(value.into()))
    }

    pub fn tag(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::TagName(value.into()))
    }

    pub fn class(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::ClassName(value.into()))
    }

    pub fn text(self, value: impl Into<String>) -> Self {
        self.target(StrategyTarget::TextContent(value.into()))
    }

    pub fn coordinates(self, x: f64, y: f64) -> Self {
        self.target(StrategyTarget::Coordinates(Point::new(x, y)))
    }

    /// Override the priority of the most recently added strategy.
    pub fn priority(mut self, priority: u32) -> Self {
        if let Some(last) = self.descriptor.strategies.last_mut() {
            last.priority = priority;
        }
        self
    }

    pub fn visual_cue(mut self, cue: impl Into<String>) -> Self {
        self.descriptor.visual_cues.push(cue.into());
        self
    }

    pub fn nearby(mut self, element: impl Into<String>) -> Self {
        self.descriptor.nearby_elements.push(element.into());
        self
    }

    pub fn expected_tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.expected.tag = Some(tag.into());
        self
    }

    pub fn expected_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor
            .expected
            .attributes
            .insert(name.into(), value.into());
        self
    }

    pub fn shadow_path<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.context.shadow_path = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn frame_path(mut self, frames: impl IntoIterator<Item = usize>) -> Self {
        self.descriptor.context.frame_path = frames.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<LocatorDescriptor, LocatorError> {
        self.descriptor.validate()?;
        Ok(self.descriptor)
    }
}
