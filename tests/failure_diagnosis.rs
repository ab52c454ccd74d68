//! Failure classification for resolutions nothing could satisfy.

mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{driver, search_button, ScriptedVision};
use relocator::action_locator::mock::{MockDocument, MockNode};
use relocator::action_locator::{
    AttemptOutcome, ConsoleLevel, ConsoleMessage, LocatorDescriptor, ReadyState,
};
use relocator::failure_analyzer::{FailureAnalysis, FixPriority, RootCause};
use relocator::perceiver_visual::{ResponseCache, VisionResult};
use relocator::{Relocator, RelocatorConfig, ResolutionOutcome};
use tokio_util::sync::CancellationToken;

fn search_descriptor() -> LocatorDescriptor {
    LocatorDescriptor::builder("Search button")
        .id("search-btn")
        .class("search-button")
        .build()
        .expect("valid descriptor")
}

fn unrelated_page() -> MockDocument {
    MockDocument::new()
        .child(MockNode::new("h1").text("Checkout"))
        .child(MockNode::new("button").id("pay").text("Pay now"))
}

async fn analyze(relocator: &Relocator, descriptor: &mut LocatorDescriptor) -> Result<FailureAnalysis> {
    let report = relocator.resolve(descriptor, &CancellationToken::new()).await?;
    assert_eq!(report.outcome, ResolutionOutcome::Failed);
    report
        .failure_analysis
        .ok_or_else(|| anyhow::anyhow!("no failure analysis"))
}

#[tokio::test]
async fn absent_element_gets_only_weak_suggestions() -> Result<()> {
    let relocator = Relocator::new(driver(unrelated_page()));
    let analysis = analyze(&relocator, &mut search_descriptor()).await?;

    assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
    assert!(!analysis.fixes.is_empty());
    assert!(analysis.fixes.iter().all(|fix| fix.confidence <= 0.3));
    assert!(analysis.element_location.is_none());
    assert!(analysis.notes.iter().any(|n| n.contains("never consulted")));
    Ok(())
}

#[tokio::test]
async fn consulted_vision_that_finds_nothing_raises_confidence() -> Result<()> {
    let vision = ScriptedVision::answering(VisionResult::not_found("no search control visible"));
    let relocator = Relocator::new(driver(unrelated_page())).with_vision(vision);
    let analysis = analyze(&relocator, &mut search_descriptor()).await?;

    assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
    assert!(analysis.confidence > 0.5);
    assert!(analysis.notes.is_empty());
    Ok(())
}

#[tokio::test]
async fn cross_origin_frame_is_never_reported_as_absent() -> Result<()> {
    let page = MockDocument::new()
        .child(MockNode::new("h1").text("Store"))
        .child(MockNode::new("iframe").iframe(MockDocument::new().child(search_button()), false));
    let relocator = Relocator::new(driver(page));
    let mut descriptor = search_descriptor();

    let report = relocator.resolve(&mut descriptor, &CancellationToken::new()).await?;

    assert!(report
        .attempts
        .iter()
        .any(|a| matches!(a.outcome, AttemptOutcome::ContextUnreachable { .. })));
    let analysis = report.failure_analysis.expect("analysis");
    assert_eq!(analysis.root_cause, RootCause::ContextUnreachable);
    assert_eq!(analysis.best_fix().map(|f| f.priority), Some(FixPriority::High));
    Ok(())
}

#[tokio::test]
async fn recorded_frame_path_into_cross_origin_frame_is_unreachable() -> Result<()> {
    let page = MockDocument::new()
        .child(MockNode::new("iframe").iframe(MockDocument::new().child(search_button()), false));
    let relocator = Relocator::new(driver(page));
    let mut descriptor = LocatorDescriptor::builder("Search button")
        .id("search-btn")
        .frame_path([0])
        .build()?;

    let analysis = analyze(&relocator, &mut descriptor).await?;
    assert_eq!(analysis.root_cause, RootCause::ContextUnreachable);
    assert!(analysis.diagnosis.contains("frame[0]"));
    Ok(())
}

#[tokio::test]
async fn closed_shadow_root_is_unreachable() -> Result<()> {
    let page = MockDocument::new()
        .child(MockNode::new("payment-widget").closed_shadow(vec![search_button()]));
    let relocator = Relocator::new(driver(page));

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::ContextUnreachable);
    assert!(analysis.what_changed.iter().any(|line| line.contains("unreachable")));
    Ok(())
}

#[tokio::test]
async fn hidden_match_is_diagnosed_as_hidden() -> Result<()> {
    let page = MockDocument::new().child(MockNode::new("nav").child(search_button().hidden()));
    let relocator = Relocator::new(driver(page));

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::ElementHidden);
    assert!(analysis
        .fixes
        .iter()
        .any(|fix| fix.code_change.as_deref() == Some("wait_for_visible()")));
    Ok(())
}

#[tokio::test]
async fn failed_resources_point_at_the_network() -> Result<()> {
    let driver = driver(unrelated_page());
    driver.push_console(ConsoleMessage::new(
        ConsoleLevel::Severe,
        "GET https://cdn.example.com/search.js net::ERR_CONNECTION_REFUSED",
    ));
    let relocator = Relocator::new(driver);

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::NetworkError);
    Ok(())
}

#[tokio::test]
async fn login_redirect_means_authentication_is_required() -> Result<()> {
    let driver = driver(unrelated_page());
    driver.set_url("https://shop.example.com/login?next=%2Fsearch");
    let relocator = Relocator::new(driver);

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::AuthenticationRequired);
    Ok(())
}

#[tokio::test]
async fn loading_document_is_a_timing_problem() -> Result<()> {
    let driver = driver(unrelated_page());
    driver.set_ready_state(ReadyState::Loading);
    let relocator = Relocator::new(driver);

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::TimingNotYetLoaded);
    Ok(())
}

#[tokio::test]
async fn resized_window_is_a_responsive_layout_change() -> Result<()> {
    let relocator = Relocator::new(driver(unrelated_page()));
    let report = relocator
        .resolve_with_baseline(
            &mut search_descriptor(),
            Some((1280, 720)),
            &CancellationToken::new(),
        )
        .await?;

    let analysis = report.failure_analysis.expect("analysis");
    assert_eq!(analysis.root_cause, RootCause::ResponsiveLayoutChange);
    assert_eq!(
        analysis.best_fix().and_then(|f| f.code_change.as_deref()),
        Some("set_window_size(1280, 720)")
    );
    Ok(())
}

#[tokio::test]
async fn unrelated_cross_origin_frame_does_not_hide_a_missing_element() -> Result<()> {
    let advert = MockDocument::new().child(MockNode::new("a").text("Buy now"));
    let page = unrelated_page().child(MockNode::new("iframe").iframe(advert, false));
    let vision = ScriptedVision::answering(VisionResult::not_found("no search control visible"));
    let relocator = Relocator::new(driver(page)).with_vision(vision);

    let analysis = analyze(&relocator, &mut search_descriptor()).await?;
    assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
    assert!(analysis
        .what_changed
        .iter()
        .any(|line| line.contains("frame[0] unreachable")));
    Ok(())
}

#[tokio::test]
async fn disabled_page_signals_still_classify_the_failure() -> Result<()> {
    let config =
        RelocatorConfig::from_yaml_str("vision:\n  enabled: false\nanalysis:\n  page_signals: false\n")?;
    let driver = driver(unrelated_page());
    driver.set_url("https://shop.example.com/login?next=%2Fsearch");
    let relocator = Relocator::from_config(driver, &config, Arc::new(ResponseCache::new()))?;

    let report = relocator
        .resolve(&mut search_descriptor(), &CancellationToken::new())
        .await?;
    assert_eq!(report.outcome, ResolutionOutcome::Failed);
    assert!(report.vision.is_none());
    let analysis = report.failure_analysis.expect("analysis");
    // The login URL is never read, so the attempts alone decide.
    assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
    assert!(!analysis.fixes.is_empty());
    Ok(())
}
