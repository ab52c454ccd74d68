//! Evidence gathered from a failed resolution

use action_locator::{
    AttemptMethod, AttemptOutcome, ConsoleLevel, ConsoleMessage, ContextPath, ReadyState,
    ResolutionAttempt,
};
use perceiver_visual::VisionResult;
use serde::{Deserialize, Serialize};

/// How the vision fallback ended for this resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VisionEvidence {
    /// Vision fallback switched off.
    Disabled,
    /// Service unreachable, timed out, or the screenshot could not be taken.
    Unavailable { reason: String },
    /// Service answered with something that could not be parsed.
    Invalid { reason: String },
    /// Service answered; the answer was not accepted.
    Rejected { result: VisionResult, reason: String },
}

impl VisionEvidence {
    /// The service was never successfully consulted.
    pub fn never_consulted(&self) -> bool {
        matches!(self, VisionEvidence::Disabled | VisionEvidence::Unavailable { .. })
    }

    pub fn result(&self) -> Option<&VisionResult> {
        match self {
            VisionEvidence::Rejected { result, .. } => Some(result),
            _ => None,
        }
    }

    /// A located element with some confidence, even if rejected.
    pub fn candidate(&self) -> Option<&VisionResult> {
        self.result()
            .filter(|result| result.found && result.confidence > 0.0 && result.target_point().is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvidence {
    pub description: String,
    pub attempts: Vec<ResolutionAttempt>,
    pub vision: VisionEvidence,
    /// Where the descriptor recorded the element; the top document when it
    /// declared no shadow or frame path.
    #[serde(default)]
    pub declared_context: ContextPath,
    /// Pixel size of the screenshot from the last successful run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_dimensions: Option<(u32, u32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_dimensions: Option<(u32, u32)>,
    #[serde(default)]
    pub console: Vec<ConsoleMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_state: Option<ReadyState>,
}

impl FailureEvidence {
    pub fn new(description: impl Into<String>, attempts: Vec<ResolutionAttempt>, vision: VisionEvidence) -> Self {
        Self {
            description: description.into(),
            attempts,
            vision,
            declared_context: ContextPath::document(),
            before_dimensions: None,
            after_dimensions: None,
            console: Vec::new(),
            url: None,
            ready_state: None,
        }
    }

    pub fn with_declared_context(mut self, context: ContextPath) -> Self {
        self.declared_context = context;
        self
    }

    pub fn with_dimensions(mut self, before: Option<(u32, u32)>, after: Option<(u32, u32)>) -> Self {
        self.before_dimensions = before;
        self.after_dimensions = after;
        self
    }

    pub fn with_console(mut self, console: Vec<ConsoleMessage>) -> Self {
        self.console = console;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_ready_state(mut self, state: Option<ReadyState>) -> Self {
        self.ready_state = state;
        self
    }

    pub fn unreachable_contexts(&self) -> Vec<(&ContextPath, &str)> {
        self.attempts
            .iter()
            .filter_map(|attempt| match &attempt.outcome {
                AttemptOutcome::ContextUnreachable { reason } => Some((&attempt.path, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Unreachable contexts on the way to the recorded location.
    pub fn blocked_declared_context(&self) -> Option<(&ContextPath, &str)> {
        self.unreachable_contexts()
            .into_iter()
            .find(|(path, _)| path.encloses(&self.declared_context))
    }

    pub fn structural_attempts(&self) -> impl Iterator<Item = &ResolutionAttempt> {
        self.attempts
            .iter()
            .filter(|attempt| matches!(attempt.method, AttemptMethod::Strategy(_)))
    }

    pub fn hidden_matches(&self) -> usize {
        self.attempts.iter().map(|attempt| attempt.hidden_matches).sum()
    }

    pub fn any_dom_match(&self) -> bool {
        self.structural_attempts().any(|attempt| {
            matches!(
                attempt.outcome,
                AttemptOutcome::Matched | AttemptOutcome::Ambiguous { .. }
            )
        })
    }

    pub fn all_structural_ambiguous(&self) -> bool {
        let mut attempts = self.structural_attempts().peekable();
        attempts.peek().is_some()
            && attempts.all(|attempt| matches!(attempt.outcome, AttemptOutcome::Ambiguous { .. }))
    }

    pub fn layout_changed(&self) -> Option<((u32, u32), (u32, u32))> {
        match (self.before_dimensions, self.after_dimensions) {
            (Some(before), Some(after)) if before != after => Some((before, after)),
            _ => None,
        }
    }

    pub fn still_loading(&self) -> bool {
        matches!(
            self.ready_state,
            Some(ReadyState::Loading | ReadyState::Interactive)
        )
    }

    pub fn auth_signals(&self) -> Vec<String> {
        let mut signals = Vec::new();
        if let Some(url) = &self.url {
            let lowered = url.to_lowercase();
            if AUTH_URL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                signals.push(format!("redirected to {url}"));
            }
        }
        signals.extend(
            self.console
                .iter()
                .filter(|message| is_auth_message(&message.text))
                .map(|message| message.text.clone()),
        );
        signals
    }

    pub fn network_errors(&self) -> Vec<&ConsoleMessage> {
        self.console
            .iter()
            .filter(|message| is_network_message(&message.text))
            .collect()
    }

    pub fn script_errors(&self) -> Vec<&ConsoleMessage> {
        self.console
            .iter()
            .filter(|message| {
                message.level == ConsoleLevel::Severe
                    || SCRIPT_ERROR_MARKERS
                        .iter()
                        .any(|marker| message.text.contains(marker))
            })
            .collect()
    }
}

const AUTH_URL_MARKERS: &[&str] = &["login", "signin", "sign-in", "sign_in", "/auth", "sso"];
const SCRIPT_ERROR_MARKERS: &[&str] = &["Uncaught", "TypeError", "ReferenceError", "SyntaxError"];

fn status_codes(text: &str) -> impl Iterator<Item = u16> + '_ {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse().ok())
}

fn mentions_status(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("status") || lowered.contains("http")
}

fn is_auth_message(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("unauthorized")
        || (mentions_status(text) && status_codes(text).any(|code| code == 401 || code == 403))
}

fn is_network_message(text: &str) -> bool {
    text.contains("net::ERR_")
        || text.contains("Failed to load resource")
        || (mentions_status(text) && status_codes(text).any(|code| (500..600).contains(&code)))
}
