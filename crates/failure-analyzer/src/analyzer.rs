//! Root-cause classification
//!
//! Rules are checked in a fixed order and the first one that fires decides
//! the category. An inaccessible context on the recorded path always wins.
//! Other inaccessible contexts decide only when nothing else can tell an
//! absent element from one hidden behind them.

use action_locator::ContextPath;
use chrono::Utc;
use tracing::info;

use crate::evidence::{FailureEvidence, VisionEvidence};
use crate::types::{
    rank_fixes, Effort, ElementLocation, FailureAnalysis, FixPriority, FixSuggestion, RootCause,
};

const OVERLAY_MARKERS: &[&str] = &[
    "overlay",
    "modal",
    "popup",
    "pop-up",
    "cookie banner",
    "cookie consent",
    "dialog",
];

/// Confidence ceiling for suggestions when nothing resembling the element
/// was found anywhere.
const NOT_FOUND_FIX_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct FailureAnalyzer;

struct Verdict {
    root_cause: RootCause,
    diagnosis: String,
    confidence: f64,
    fixes: Vec<FixSuggestion>,
    notes: Vec<String>,
}

impl Verdict {
    fn new(root_cause: RootCause, confidence: f64, diagnosis: String) -> Self {
        Self {
            root_cause,
            diagnosis,
            confidence,
            fixes: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn fix(mut self, fix: FixSuggestion) -> Self {
        self.fixes.push(fix);
        self
    }
}

impl FailureAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, evidence: &FailureEvidence) -> FailureAnalysis {
        let mut verdict = self.classify(evidence);

        // Any concrete locator from the vision service beats generic advice
        // within its tier; not-found keeps only its weak suggestions.
        if verdict.root_cause != RootCause::ElementNotFound {
            if let Some(locator) = evidence
                .vision
                .result()
                .and_then(|result| result.suggested_locator.as_deref())
            {
                verdict.fixes.push(
                    FixSuggestion::new(
                        format!("Add the locator proposed by the vision service: {locator}"),
                        locator_tier(verdict.root_cause),
                        evidence.vision.result().map_or(0.5, |r| r.confidence.clamp(0.3, 0.9)),
                    )
                    .with_code_change(locator.to_string())
                    .with_effort(Effort::Low)
                    .backed_by_locator(),
                );
            }
        }
        if evidence.vision.never_consulted() {
            verdict
                .notes
                .push("vision fallback was never consulted".to_string());
        }
        rank_fixes(&mut verdict.fixes);

        let element_location = evidence.vision.candidate().and_then(|result| {
            result.target_point().map(|point| ElementLocation {
                point,
                description: result.element_description.clone(),
            })
        });

        info!(
            target: "failure-analyzer",
            description = %evidence.description,
            root_cause = %verdict.root_cause,
            confidence = verdict.confidence,
            fixes = verdict.fixes.len(),
            "failure classified"
        );

        FailureAnalysis {
            root_cause: verdict.root_cause,
            diagnosis: verdict.diagnosis,
            confidence: verdict.confidence,
            what_changed: observations(evidence),
            element_location,
            fixes: verdict.fixes,
            notes: verdict.notes,
            analyzed_at: Utc::now(),
        }
    }

    fn classify(&self, evidence: &FailureEvidence) -> Verdict {
        let target = &evidence.description;

        if let Some((path, reason)) = evidence.blocked_declared_context() {
            return unreachable_verdict(
                0.9,
                format!(
                    "'{target}' may live in a context that cannot be searched: {path} ({reason})"
                ),
                path,
            );
        }

        let auth = evidence.auth_signals();
        if let Some(signal) = auth.first() {
            return Verdict::new(
                RootCause::AuthenticationRequired,
                0.8,
                format!("'{target}' is behind authentication: {signal}"),
            )
            .fix(
                FixSuggestion::new(
                    "Sign in (or restore the session cookies) before this step",
                    FixPriority::High,
                    0.8,
                )
                .with_effort(Effort::Medium),
            );
        }

        let network = evidence.network_errors();
        if let Some(message) = network.first() {
            return Verdict::new(
                RootCause::NetworkError,
                0.8,
                format!(
                    "Page resources failed to load ({} errors), first: {}",
                    network.len(),
                    message.text
                ),
            )
            .fix(
                FixSuggestion::new(
                    "Check the backing services and retry the run once they are healthy",
                    FixPriority::High,
                    0.7,
                )
                .with_effort(Effort::Low),
            )
            .fix(FixSuggestion::new(
                "Wait for network idle before locating the element",
                FixPriority::Medium,
                0.5,
            )
            .with_code_change("wait_for_network_idle()")
            .with_effort(Effort::Low));
        }

        let scripts = evidence.script_errors();
        if let Some(message) = scripts.first() {
            return Verdict::new(
                RootCause::ScriptError,
                0.7,
                format!(
                    "A script error may have stopped '{target}' from rendering: {}",
                    message.text
                ),
            )
            .fix(
                FixSuggestion::new(
                    "Fix the script error reported in the browser console",
                    FixPriority::High,
                    0.7,
                )
                .with_effort(Effort::Medium),
            );
        }

        if evidence.still_loading() {
            let state = evidence
                .ready_state
                .map(|state| format!("{state:?}").to_lowercase())
                .unwrap_or_default();
            return Verdict::new(
                RootCause::TimingNotYetLoaded,
                0.6,
                format!("The document was still {state} when '{target}' was looked up"),
            )
            .fix(
                FixSuggestion::new(
                    "Wait for the document to finish loading before this step",
                    FixPriority::High,
                    0.7,
                )
                .with_code_change("wait_for_ready_state(\"complete\")")
                .with_effort(Effort::Low),
            );
        }

        let hidden = evidence.hidden_matches();
        if hidden > 0 {
            return Verdict::new(
                RootCause::ElementHidden,
                0.75,
                format!("'{target}' matched {hidden} element(s) that are not displayed"),
            )
            .fix(
                FixSuggestion::new(
                    "Perform the interaction that reveals the element (expand, hover, scroll) first",
                    FixPriority::High,
                    0.6,
                )
                .with_effort(Effort::Medium),
            )
            .fix(FixSuggestion::new(
                "Wait until the element becomes visible",
                FixPriority::Medium,
                0.5,
            )
            .with_code_change("wait_for_visible()")
            .with_effort(Effort::Low));
        }

        if let Some(result) = evidence.vision.result() {
            let text = format!("{} {}", result.reasoning, result.element_description).to_lowercase();
            if let Some(marker) = OVERLAY_MARKERS.iter().find(|marker| text.contains(*marker)) {
                return Verdict::new(
                    RootCause::BlockedByOverlay,
                    0.7,
                    format!("'{target}' appears to be covered by a {marker}"),
                )
                .fix(
                    FixSuggestion::new(
                        format!("Dismiss the {marker} before this step"),
                        FixPriority::High,
                        0.7,
                    )
                    .with_effort(Effort::Low),
                );
            }
        }

        if let Some(((bw, bh), (aw, ah))) = evidence.layout_changed() {
            return Verdict::new(
                RootCause::ResponsiveLayoutChange,
                0.65,
                format!("The page is rendered at {aw}x{ah} instead of {bw}x{bh}; the layout may have switched"),
            )
            .fix(
                FixSuggestion::new(
                    format!("Run with the recorded window size {bw}x{bh}"),
                    FixPriority::High,
                    0.65,
                )
                .with_code_change(format!("set_window_size({bw}, {bh})"))
                .with_effort(Effort::Low),
            );
        }

        if let VisionEvidence::Rejected { result, reason } = &evidence.vision {
            if evidence.vision.candidate().is_some() {
                return Verdict::new(
                    RootCause::ElementMoved,
                    (0.4 + 0.5 * result.confidence).min(0.9),
                    format!(
                        "A likely match for '{target}' is visible but its structural locators no longer resolve ({reason})"
                    ),
                )
                .fix(
                    FixSuggestion::new(
                        "Re-record the element so its locators match the new markup",
                        FixPriority::Medium,
                        0.5,
                    )
                    .with_effort(Effort::Medium),
                );
            }
        }

        if evidence.all_structural_ambiguous() {
            return Verdict::new(
                RootCause::StaleTestData,
                0.6,
                format!("Every locator for '{target}' now matches several elements"),
            )
            .fix(
                FixSuggestion::new(
                    "Make the locator values unique, or refresh the test data they rely on",
                    FixPriority::High,
                    0.6,
                )
                .with_effort(Effort::Medium),
            );
        }

        if !evidence.any_dom_match() && evidence.vision.candidate().is_none() {
            // Without a usable vision answer nothing rules out the contexts
            // that could not be searched.
            let unreachable = evidence.unreachable_contexts();
            if let (Some((path, reason)), None) = (unreachable.first(), evidence.vision.result()) {
                return unreachable_verdict(
                    0.5,
                    format!(
                        "'{target}' was not found, and {path} ({reason}) could not be searched"
                    ),
                    path,
                );
            }
            let consulted = !evidence.vision.never_consulted();
            let mut diagnosis = format!("'{target}' was not found in any searchable context");
            if !consulted {
                diagnosis.push_str("; vision was never consulted, so it may still be on the page");
            }
            return Verdict::new(
                RootCause::ElementNotFound,
                if consulted { 0.7 } else { 0.4 },
                diagnosis,
            )
            .fix(
                FixSuggestion::new(
                    "Confirm the element still exists on this page; remove or update the step if it was dropped",
                    FixPriority::Medium,
                    NOT_FOUND_FIX_CONFIDENCE,
                )
                .with_effort(Effort::Low),
            )
            .fix(FixSuggestion::new(
                "Re-record the step against the current page",
                FixPriority::Low,
                0.2,
            )
            .with_effort(Effort::Medium));
        }

        Verdict::new(
            RootCause::Unknown,
            0.2,
            format!("No single cause explains why '{target}' could not be resolved"),
        )
        .fix(FixSuggestion::new(
            "Inspect the attempts and screenshots for this resolution manually",
            FixPriority::Low,
            0.2,
        )
        .with_effort(Effort::High))
    }
}

fn unreachable_verdict(confidence: f64, diagnosis: String, path: &ContextPath) -> Verdict {
    Verdict::new(RootCause::ContextUnreachable, confidence, diagnosis)
        .fix(
            FixSuggestion::new(
                format!("Open the content of {path} directly instead of through its embedding page"),
                FixPriority::High,
                0.7,
            )
            .with_effort(Effort::Medium),
        )
        .fix(FixSuggestion::new(
            "Ask the page owners to expose the element through an open shadow root or a same-origin frame",
            FixPriority::Low,
            0.4,
        )
        .with_effort(Effort::High))
}

fn locator_tier(root_cause: RootCause) -> FixPriority {
    match root_cause {
        RootCause::ElementMoved | RootCause::StaleTestData | RootCause::ResponsiveLayoutChange => {
            FixPriority::High
        }
        RootCause::ContextUnreachable | RootCause::BlockedByOverlay | RootCause::Unknown => {
            FixPriority::Medium
        }
        _ => FixPriority::Low,
    }
}

/// Plain observations, independent of the chosen category.
fn observations(evidence: &FailureEvidence) -> Vec<String> {
    let mut seen = Vec::new();
    for attempt in evidence.structural_attempts() {
        let line = format!("{} {} in {}", attempt.method, attempt.outcome.label(), attempt.path);
        if !seen.contains(&line) {
            seen.push(line);
        }
    }
    for (path, reason) in evidence.unreachable_contexts() {
        seen.push(format!("{path} unreachable: {reason}"));
    }
    let hidden = evidence.hidden_matches();
    if hidden > 0 {
        seen.push(format!("{hidden} matching element(s) not displayed"));
    }
    if let Some(((bw, bh), (aw, ah))) = evidence.layout_changed() {
        seen.push(format!("screenshot size changed from {bw}x{bh} to {aw}x{ah}"));
    }
    match &evidence.vision {
        VisionEvidence::Rejected { reason, .. } => seen.push(format!("vision answer rejected: {reason}")),
        VisionEvidence::Invalid { reason } => seen.push(format!("vision answer unusable: {reason}")),
        VisionEvidence::Unavailable { reason } => seen.push(format!("vision unavailable: {reason}")),
        VisionEvidence::Disabled => {}
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_locator::{
        AttemptMethod, AttemptOutcome, ConsoleLevel, ConsoleMessage, ContextPath, ReadyState,
        ResolutionAttempt, StrategyKind,
    };
    use perceiver_visual::VisionResult;
    use relocator_core_types::Point;

    fn no_match(kind: StrategyKind) -> ResolutionAttempt {
        ResolutionAttempt::new(AttemptMethod::Strategy(kind), ContextPath::document(), AttemptOutcome::NoMatch)
    }

    fn rejected(confidence: f64, reasoning: &str, locator: Option<&str>) -> VisionEvidence {
        VisionEvidence::Rejected {
            result: VisionResult {
                found: confidence > 0.0,
                coordinates: Some(Point::new(400.0, 300.0)),
                bounding_box: None,
                confidence,
                reasoning: reasoning.to_string(),
                element_description: "blue button".to_string(),
                suggested_locator: locator.map(str::to_string),
            },
            reason: "confidence 0.40 below minimum 0.70".to_string(),
        }
    }

    fn not_found_evidence(vision: VisionEvidence) -> FailureEvidence {
        FailureEvidence::new(
            "Search button",
            vec![no_match(StrategyKind::Identifier), no_match(StrategyKind::ClassName)],
            vision,
        )
    }

    #[test]
    fn absent_element_yields_only_weak_fixes() {
        let analysis = FailureAnalyzer::new().analyze(&not_found_evidence(rejected(
            0.0,
            "nothing resembling a search button",
            None,
        )));
        assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
        assert!(analysis
            .fixes
            .iter()
            .all(|fix| fix.confidence <= NOT_FOUND_FIX_CONFIDENCE));
        assert!(analysis.element_location.is_none());
        assert!(analysis.notes.is_empty());
    }

    #[test]
    fn unreachable_context_beats_every_other_signal() {
        let mut evidence = not_found_evidence(VisionEvidence::Unavailable {
            reason: "connection refused".into(),
        })
        .with_console(vec![ConsoleMessage::new(ConsoleLevel::Severe, "Uncaught TypeError")])
        .with_ready_state(Some(ReadyState::Loading))
        .with_declared_context(ContextPath::document().child_frame(1));
        evidence.attempts.push(ResolutionAttempt::unreachable(
            ContextPath::document().child_frame(1),
            "cross-origin frame",
        ));
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::ContextUnreachable);
        assert!(analysis
            .what_changed
            .iter()
            .any(|line| line.contains("frame[1] unreachable")));
        assert_eq!(analysis.notes, ["vision fallback was never consulted"]);
    }

    fn with_ad_frame(mut evidence: FailureEvidence) -> FailureEvidence {
        evidence.attempts.push(ResolutionAttempt::unreachable(
            ContextPath::document().child_frame(1),
            "cross-origin frame",
        ));
        evidence
    }

    #[test]
    fn unrelated_frame_does_not_mask_a_missing_element() {
        let analysis = FailureAnalyzer::new().analyze(&with_ad_frame(not_found_evidence(rejected(
            0.0,
            "no search control visible",
            None,
        ))));
        assert_eq!(analysis.root_cause, RootCause::ElementNotFound);
        assert!(analysis
            .what_changed
            .iter()
            .any(|line| line.contains("frame[1] unreachable")));
    }

    #[test]
    fn unrelated_frame_does_not_mask_hidden_matches() {
        let mut evidence = with_ad_frame(not_found_evidence(VisionEvidence::Disabled));
        evidence.attempts[0].hidden_matches = 1;
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::ElementHidden);
    }

    #[test]
    fn unrelated_frame_decides_only_without_a_vision_answer() {
        let analysis = FailureAnalyzer::new().analyze(&with_ad_frame(not_found_evidence(
            VisionEvidence::Unavailable {
                reason: "timed out".into(),
            },
        )));
        assert_eq!(analysis.root_cause, RootCause::ContextUnreachable);
        assert!(analysis.confidence < 0.9);
        assert!(analysis.diagnosis.contains("frame[1]"));
        assert_eq!(analysis.best_fix().map(|fix| fix.priority), Some(FixPriority::High));
    }

    #[test]
    fn unavailable_vision_lowers_not_found_confidence() {
        let consulted = FailureAnalyzer::new().analyze(&not_found_evidence(rejected(0.0, "", None)));
        let skipped = FailureAnalyzer::new().analyze(&not_found_evidence(VisionEvidence::Unavailable {
            reason: "timed out".into(),
        }));
        assert_eq!(skipped.root_cause, RootCause::ElementNotFound);
        assert!(skipped.confidence < consulted.confidence);
        assert!(skipped.diagnosis.contains("never consulted"));
    }

    #[test]
    fn console_signals_follow_rule_order() {
        let evidence = not_found_evidence(VisionEvidence::Disabled).with_console(vec![
            ConsoleMessage::new(ConsoleLevel::Severe, "Uncaught ReferenceError: app is not defined"),
            ConsoleMessage::new(ConsoleLevel::Severe, "GET /api net::ERR_NAME_NOT_RESOLVED"),
        ]);
        assert_eq!(FailureAnalyzer::new().analyze(&evidence).root_cause, RootCause::NetworkError);

        let evidence = not_found_evidence(VisionEvidence::Disabled).with_console(vec![
            ConsoleMessage::new(ConsoleLevel::Severe, "Uncaught ReferenceError: app is not defined"),
        ]);
        assert_eq!(FailureAnalyzer::new().analyze(&evidence).root_cause, RootCause::ScriptError);

        let evidence = not_found_evidence(VisionEvidence::Disabled)
            .with_url(Some("https://example.com/signin".into()));
        assert_eq!(
            FailureAnalyzer::new().analyze(&evidence).root_cause,
            RootCause::AuthenticationRequired
        );
    }

    #[test]
    fn loading_document_and_hidden_matches() {
        let evidence = not_found_evidence(VisionEvidence::Disabled).with_ready_state(Some(ReadyState::Interactive));
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::TimingNotYetLoaded);
        assert!(analysis.diagnosis.contains("interactive"));

        let mut evidence = not_found_evidence(VisionEvidence::Disabled);
        evidence.attempts[0].hidden_matches = 1;
        assert_eq!(FailureAnalyzer::new().analyze(&evidence).root_cause, RootCause::ElementHidden);
    }

    #[test]
    fn overlay_reasoning_and_layout_change() {
        let evidence = not_found_evidence(rejected(0.4, "A cookie banner covers the header", None));
        assert_eq!(FailureAnalyzer::new().analyze(&evidence).root_cause, RootCause::BlockedByOverlay);

        let evidence = not_found_evidence(rejected(0.4, "button at top right", None))
            .with_dimensions(Some((1920, 1080)), Some((390, 844)));
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::ResponsiveLayoutChange);
        assert_eq!(analysis.best_fix().unwrap().code_change.as_deref(), Some("set_window_size(1920, 1080)"));
    }

    #[test]
    fn low_confidence_candidate_means_moved_and_locator_fix_ranks_first() {
        let evidence = not_found_evidence(rejected(0.4, "button at top right", Some("css: button.search")));
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::ElementMoved);
        assert_eq!(analysis.element_location.as_ref().unwrap().point, Point::new(400.0, 300.0));
        let best = analysis.best_fix().unwrap();
        assert!(best.backed_by_locator);
        assert_eq!(best.code_change.as_deref(), Some("css: button.search"));
    }

    #[test]
    fn all_ambiguous_is_stale_test_data() {
        let evidence = FailureEvidence::new(
            "Row link",
            vec![ResolutionAttempt::new(
                AttemptMethod::Strategy(StrategyKind::TextContent),
                ContextPath::document(),
                AttemptOutcome::Ambiguous { count: 4 },
            )],
            VisionEvidence::Invalid { reason: "no JSON".into() },
        );
        let analysis = FailureAnalyzer::new().analyze(&evidence);
        assert_eq!(analysis.root_cause, RootCause::StaleTestData);
        assert!(analysis.notes.is_empty());
    }

    #[test]
    fn mixed_evidence_without_a_rule_is_unknown() {
        let evidence = FailureEvidence::new(
            "Row link",
            vec![
                no_match(StrategyKind::Identifier),
                ResolutionAttempt::new(
                    AttemptMethod::Strategy(StrategyKind::TextContent),
                    ContextPath::document(),
                    AttemptOutcome::Ambiguous { count: 2 },
                ),
            ],
            VisionEvidence::Disabled,
        );
        assert_eq!(FailureAnalyzer::new().analyze(&evidence).root_cause, RootCause::Unknown);
    }
}
