//! Data models for vision-based element location

use std::collections::BTreeMap;

use relocator_core_types::{Point, Rect, Screenshot, Viewport};
use serde::{Deserialize, Serialize};

/// Locate-by-description request.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionQuery {
    pub description: String,
    pub visual_cues: Vec<String>,
    pub nearby_elements: Vec<String>,
    /// Expected tag and attributes, e.g. `tag -> button`.
    pub expected: BTreeMap<String, String>,
    pub screenshot: Screenshot,
    pub viewport: Viewport,
}

impl VisionQuery {
    pub fn new(description: impl Into<String>, screenshot: Screenshot, viewport: Viewport) -> Self {
        Self {
            description: description.into(),
            visual_cues: Vec::new(),
            nearby_elements: Vec::new(),
            expected: BTreeMap::new(),
            screenshot,
            viewport,
        }
    }

    pub fn with_visual_cues(mut self, cues: impl IntoIterator<Item = String>) -> Self {
        self.visual_cues = cues.into_iter().collect();
        self
    }

    pub fn with_nearby_elements(mut self, elements: impl IntoIterator<Item = String>) -> Self {
        self.nearby_elements = elements.into_iter().collect();
        self
    }

    pub fn with_expected(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected.insert(key.into(), value.into());
        self
    }
}

/// What the vision service reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<Rect>,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub element_description: String,
    /// Normalized `kind: value` or plain selector string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_locator: Option<String>,
}

impl VisionResult {
    pub fn not_found(reasoning: impl Into<String>) -> Self {
        Self {
            found: false,
            coordinates: None,
            bounding_box: None,
            confidence: 0.0,
            reasoning: reasoning.into(),
            element_description: String::new(),
            suggested_locator: None,
        }
    }

    /// Target point: explicit coordinates, else the bounding box center.
    pub fn target_point(&self) -> Option<Point> {
        self.coordinates
            .or_else(|| self.bounding_box.map(|rect| rect.center()))
    }
}

/// Why a result was not accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Acceptance {
    Accepted { point: Point },
    Rejected { reason: String },
}

impl Acceptance {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Acceptance::Accepted { .. })
    }
}

/// Minimal acceptance rule with an optional confidence floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceptancePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

impl AcceptancePolicy {
    pub fn with_min_confidence(min_confidence: f64) -> Self {
        Self {
            min_confidence: Some(min_confidence),
        }
    }

    pub fn evaluate(&self, result: &VisionResult, viewport: Viewport) -> Acceptance {
        let reject = |reason: String| Acceptance::Rejected { reason };
        if !result.found {
            return reject("vision service did not find the element".to_string());
        }
        if !result.confidence.is_finite() || result.confidence < 0.0 {
            return reject(format!("invalid confidence {}", result.confidence));
        }
        if let Some(min) = self.min_confidence {
            if result.confidence < min {
                return reject(format!(
                    "confidence {:.2} below minimum {:.2}",
                    result.confidence, min
                ));
            }
        }
        let Some(point) = result.target_point() else {
            return reject("no coordinates returned".to_string());
        };
        if !viewport.contains(point) {
            return reject(format!("point {point} outside viewport {viewport}"));
        }
        Acceptance::Accepted { point }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(x: f64, y: f64, confidence: f64) -> VisionResult {
        VisionResult {
            found: true,
            coordinates: Some(Point::new(x, y)),
            confidence,
            ..VisionResult::not_found("")
        }
    }

    #[test]
    fn accepts_found_results_inside_viewport() {
        let policy = AcceptancePolicy::default();
        let viewport = Viewport::new(1920, 1080);
        assert_eq!(
            policy.evaluate(&found(1625.0, 14.0, 0.92), viewport),
            Acceptance::Accepted {
                point: Point::new(1625.0, 14.0)
            }
        );
        assert!(policy.evaluate(&found(1625.0, 14.0, 0.0), viewport).is_accepted());
        assert!(!policy.evaluate(&found(2500.0, 14.0, 0.9), viewport).is_accepted());
        assert!(!policy.evaluate(&found(10.0, 10.0, -0.1), viewport).is_accepted());
        assert!(!policy
            .evaluate(&VisionResult::not_found("nothing"), viewport)
            .is_accepted());
    }

    #[test]
    fn min_confidence_is_optional() {
        let viewport = Viewport::new(1920, 1080);
        let strict = AcceptancePolicy::with_min_confidence(0.7);
        assert!(!strict.evaluate(&found(100.0, 100.0, 0.5), viewport).is_accepted());
        assert!(strict.evaluate(&found(100.0, 100.0, 0.7), viewport).is_accepted());
    }

    #[test]
    fn bounding_box_center_is_a_fallback_point() {
        let result = VisionResult {
            found: true,
            bounding_box: Some(Rect::new(1600.0, 0.0, 50.0, 28.0)),
            confidence: 0.8,
            ..VisionResult::not_found("")
        };
        assert_eq!(result.target_point(), Some(Point::new(1625.0, 14.0)));
    }
}
