#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relocator::action_locator::mock::{MockDocument, MockDriver, MockNode};
use relocator::core_types::{Point, Rect};
use relocator::perceiver_visual::{VisionError, VisionLocator, VisionQuery, VisionResult};
use tokio_util::sync::CancellationToken;

/// Vision service double answering every query the same way.
pub struct ScriptedVision {
    answer: Result<VisionResult, VisionError>,
    calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn answering(result: VisionResult) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(result),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: VisionError) -> Arc<Self> {
        Arc::new(Self {
            answer: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionLocator for ScriptedVision {
    async fn locate(
        &self,
        _query: &VisionQuery,
        _cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// Never answers; resolves only through cancellation.
pub struct StalledVision;

#[async_trait]
impl VisionLocator for StalledVision {
    async fn locate(
        &self,
        _query: &VisionQuery,
        cancel: &CancellationToken,
    ) -> Result<VisionResult, VisionError> {
        cancel.cancelled().await;
        Err(VisionError::Cancelled)
    }
}

pub fn found_at(x: f64, y: f64, confidence: f64) -> VisionResult {
    VisionResult {
        found: true,
        coordinates: Some(Point::new(x, y)),
        bounding_box: None,
        confidence,
        reasoning: "magnifier icon at the right end of the header".to_string(),
        element_description: "search icon button".to_string(),
        suggested_locator: Some("css: button.search-icon".to_string()),
    }
}

pub fn search_button() -> MockNode {
    MockNode::new("button")
        .id("search-btn")
        .class("search-button")
        .text("Search")
        .rect(Rect::new(1600.0, 0.0, 50.0, 28.0))
}

/// Header whose search button lost its id and text; only its position is
/// unchanged.
pub fn redesigned_header() -> MockDocument {
    MockDocument::new().child(
        MockNode::new("header")
            .rect(Rect::new(0.0, 0.0, 1920.0, 60.0))
            .child(MockNode::new("a").text("Home").rect(Rect::new(10.0, 0.0, 80.0, 28.0)))
            .child(
                MockNode::new("button")
                    .class("search-icon")
                    .rect(Rect::new(1600.0, 0.0, 50.0, 28.0)),
            ),
    )
}

pub fn driver(document: MockDocument) -> Arc<MockDriver> {
    Arc::new(MockDriver::new(document))
}
