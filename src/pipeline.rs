//! Resolution pipeline
//!
//! Navigator and resolver first (every root, every strategy), then one
//! vision call through the cache, then failure analysis. Frame context is
//! restored before anything past the structural stage touches the driver.

use std::sync::Arc;
use std::time::Instant;

use action_locator::{
    AttemptMethod, AttemptOutcome, BrowserDriver, ContextNavigator, ContextPath, DeclaredPriority,
    DriverError, ElementHandle, ElementMatch, LocatorDescriptor, NavigatorLimits, PriorityPolicy, ResolutionAttempt,
    RootVisit, StrategyResolver, SuccessTracker,
};
use failure_analyzer::{FailureAnalyzer, FailureEvidence, VisionEvidence};
use perceiver_visual::{
    Acceptance, AcceptancePolicy, CachedVisionLocator, HttpVisionClient, ResponseCache, VisionError,
    VisionLocator, VisionQuery, VisionResult,
};
use relocator_core_types::{Screenshot, SessionId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelocatorConfig;
use crate::errors::RelocateError;
use crate::report::{ResolutionMethod, ResolutionOutcome, ResolutionReport};

/// Resolves descriptors against one browser session.
pub struct Relocator {
    session: SessionId,
    driver: Arc<dyn BrowserDriver>,
    vision: Option<Arc<dyn VisionLocator>>,
    acceptance: AcceptancePolicy,
    limits: NavigatorLimits,
    policy: Arc<dyn PriorityPolicy>,
    analyzer: FailureAnalyzer,
    page_signals: bool,
}

enum VisionStage {
    Matched(ElementHandle, VisionResult),
    Failed(VisionEvidence),
    Cancelled,
}

impl Relocator {
    /// Structural resolution only; no vision, page signals collected.
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            session: SessionId::new(),
            driver,
            vision: None,
            acceptance: AcceptancePolicy::default(),
            limits: NavigatorLimits::default(),
            policy: Arc::new(DeclaredPriority),
            analyzer: FailureAnalyzer::new(),
            page_signals: true,
        }
    }

    /// Wire the HTTP vision client from `config`. `cache` is shared between
    /// sessions and only used when caching is enabled.
    pub fn from_config(
        driver: Arc<dyn BrowserDriver>,
        config: &RelocatorConfig,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, RelocateError> {
        let mut relocator = Self::new(driver)
            .with_limits(config.navigator)
            .with_acceptance(config.vision.acceptance());
        if config.vision.enabled {
            let client: Arc<dyn VisionLocator> =
                Arc::new(HttpVisionClient::new(config.vision.http_config())?);
            relocator = if config.cache.enabled {
                relocator.with_cached_vision(client, cache)
            } else {
                relocator.with_vision(client)
            };
        }
        relocator.page_signals = config.analysis.page_signals;
        Ok(relocator)
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionLocator>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_cached_vision(self, vision: Arc<dyn VisionLocator>, cache: Arc<ResponseCache>) -> Self {
        self.with_vision(Arc::new(CachedVisionLocator::new(vision, cache)))
    }

    pub fn with_acceptance(mut self, acceptance: AcceptancePolicy) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn with_limits(mut self, limits: NavigatorLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PriorityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Classify failures from attempts and the vision outcome alone, without
    /// asking the driver for console, URL, ready state or a fresh screenshot.
    pub fn without_page_signals(mut self) -> Self {
        self.page_signals = false;
        self
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn resolve(
        &self,
        descriptor: &mut LocatorDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, RelocateError> {
        self.resolve_with_baseline(descriptor, None, cancel).await
    }

    /// Like [`Relocator::resolve`], with the pixel size of the screenshot
    /// taken when the descriptor was recorded.
    pub async fn resolve_with_baseline(
        &self,
        descriptor: &mut LocatorDescriptor,
        baseline: Option<(u32, u32)>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, RelocateError> {
        descriptor.validate()?;
        let started = Instant::now();
        let mut attempts = Vec::new();
        info!(
            session = %self.session,
            description = %descriptor.description,
            strategies = descriptor.strategies.len(),
            policy = self.policy.name(),
            "resolving element"
        );

        let structural = self.resolve_structural(descriptor, &mut attempts, cancel).await?;
        if let Some(found) = structural {
            return Ok(self.finish(
                descriptor,
                ResolutionOutcome::Matched,
                ResolutionMethod::Strategy(found.kind),
                Some((found.path, found.element)),
                attempts,
                None,
                None,
                started,
            ));
        }
        if cancel.is_cancelled() {
            return Ok(self.cancelled(descriptor, attempts, started));
        }
        warn!(description = %descriptor.description, attempts = attempts.len(), "all strategies exhausted");

        let mut after: Option<Screenshot> = None;
        let evidence = match self.resolve_visually(descriptor, &mut attempts, &mut after, cancel).await? {
            VisionStage::Matched(element, result) => {
                return Ok(self.finish(
                    descriptor,
                    ResolutionOutcome::VisionMatched,
                    ResolutionMethod::Vision,
                    Some((ContextPath::document(), element)),
                    attempts,
                    Some(result),
                    None,
                    started,
                ));
            }
            VisionStage::Cancelled => return Ok(self.cancelled(descriptor, attempts, started)),
            VisionStage::Failed(evidence) => evidence,
        };
        warn!(description = %descriptor.description, "all fallbacks exhausted");

        let vision = evidence.result().cloned();
        let evidence = self
            .collect_evidence(descriptor, &attempts, evidence, baseline, after.as_ref())
            .await;
        let analysis = self.analyzer.analyze(&evidence);
        Ok(self.finish(
            descriptor,
            ResolutionOutcome::Failed,
            ResolutionMethod::None,
            None,
            attempts,
            vision,
            Some(analysis),
            started,
        ))
    }

    async fn resolve_structural(
        &self,
        descriptor: &mut LocatorDescriptor,
        attempts: &mut Vec<ResolutionAttempt>,
        cancel: &CancellationToken,
    ) -> Result<Option<ElementMatch>, RelocateError> {
        let mut navigator =
            ContextNavigator::new(self.driver.as_ref(), self.limits).with_preferred(&descriptor.context);
        let resolver = StrategyResolver::new(self.driver.as_ref()).with_policy(self.policy.as_ref());

        let outcome = search_roots(&mut navigator, &resolver, descriptor, attempts, cancel).await;
        let restored = navigator.restore().await;
        let found = outcome?;
        restored?;
        Ok(found)
    }

    async fn resolve_visually(
        &self,
        descriptor: &mut LocatorDescriptor,
        attempts: &mut Vec<ResolutionAttempt>,
        after: &mut Option<Screenshot>,
        cancel: &CancellationToken,
    ) -> Result<VisionStage, RelocateError> {
        let Some(vision) = &self.vision else {
            return Ok(VisionStage::Failed(VisionEvidence::Disabled));
        };

        let started = Instant::now();
        let capture = async {
            let screenshot = self.driver.screenshot().await?;
            let viewport = self.driver.viewport().await?;
            Ok::<_, DriverError>((screenshot, viewport))
        };
        let (screenshot, viewport) = match capture.await {
            Ok(captured) => captured,
            Err(err @ DriverError::Disconnected(_)) => return Err(err.into()),
            Err(err) => {
                let reason = VisionError::Capture(err.to_string()).to_string();
                attempts.push(vision_attempt(
                    AttemptOutcome::Errored {
                        message: reason.clone(),
                    },
                    &started,
                ));
                return Ok(VisionStage::Failed(VisionEvidence::Unavailable { reason }));
            }
        };
        *after = Some(screenshot.clone());

        let query = vision_query(descriptor, screenshot, viewport);
        let result = match vision.locate(&query, cancel).await {
            Ok(result) => result,
            Err(VisionError::Cancelled) => {
                attempts.push(vision_attempt(AttemptOutcome::Cancelled, &started));
                return Ok(VisionStage::Cancelled);
            }
            Err(err) => {
                warn!(service = vision.name(), error = %err, "vision fallback failed");
                attempts.push(vision_attempt(
                    AttemptOutcome::Errored {
                        message: err.to_string(),
                    },
                    &started,
                ));
                let reason = err.to_string();
                return Ok(VisionStage::Failed(match err {
                    VisionError::InvalidResponse(_) => VisionEvidence::Invalid { reason },
                    _ => VisionEvidence::Unavailable { reason },
                }));
            }
        };

        let point = match self.acceptance.evaluate(&result, viewport) {
            Acceptance::Accepted { point } => point,
            Acceptance::Rejected { reason } => {
                debug!(confidence = result.confidence, reason = %reason, "vision answer rejected");
                attempts.push(vision_attempt(AttemptOutcome::NoMatch, &started));
                return Ok(VisionStage::Failed(VisionEvidence::Rejected { result, reason }));
            }
        };

        let element = match self.driver.element_at_point(point).await {
            Ok(element) => element,
            Err(err @ DriverError::Disconnected(_)) => return Err(err.into()),
            Err(err) => {
                warn!(%point, error = %err, "point lookup failed");
                None
            }
        };
        let Some(element) = element else {
            attempts.push(vision_attempt(AttemptOutcome::NoMatch, &started));
            return Ok(VisionStage::Failed(VisionEvidence::Rejected {
                result,
                reason: format!("no element at {point}"),
            }));
        };

        attempts.push(vision_attempt(AttemptOutcome::Matched, &started));
        if let Some(suggestion) = &result.suggested_locator {
            descriptor.record_vision_suggestion(suggestion.as_str());
        }
        info!(
            %point,
            confidence = result.confidence,
            suggestion = result.suggested_locator.as_deref().unwrap_or("-"),
            "element resolved by vision"
        );
        Ok(VisionStage::Matched(element, result))
    }

    async fn collect_evidence(
        &self,
        descriptor: &LocatorDescriptor,
        attempts: &[ResolutionAttempt],
        vision: VisionEvidence,
        baseline: Option<(u32, u32)>,
        after: Option<&Screenshot>,
    ) -> FailureEvidence {
        let evidence = FailureEvidence::new(descriptor.description.clone(), attempts.to_vec(), vision)
            .with_declared_context(descriptor.context.path());
        if !self.page_signals {
            return evidence.with_dimensions(baseline, after.map(Screenshot::dimensions));
        }
        let after = match after {
            Some(screenshot) => Some(screenshot.dimensions()),
            None => self.driver.screenshot().await.ok().map(|s| s.dimensions()),
        };
        let console = self.driver.console_messages().await.unwrap_or_else(|err| {
            debug!(error = %err, "console messages unavailable");
            Vec::new()
        });
        evidence
            .with_dimensions(baseline, after)
            .with_console(console)
            .with_url(self.driver.current_url().await.ok().flatten())
            .with_ready_state(self.driver.ready_state().await.ok())
    }

    fn cancelled(
        &self,
        descriptor: &LocatorDescriptor,
        mut attempts: Vec<ResolutionAttempt>,
        started: Instant,
    ) -> ResolutionReport {
        info!(description = %descriptor.description, "resolution cancelled");
        // The trail always ends with the step that observed the cancellation.
        if attempts.last().map(|a| &a.outcome) != Some(&AttemptOutcome::Cancelled) {
            attempts.push(ResolutionAttempt::new(
                AttemptMethod::Context,
                ContextPath::document(),
                AttemptOutcome::Cancelled,
            ));
        }
        self.finish(
            descriptor,
            ResolutionOutcome::Cancelled,
            ResolutionMethod::None,
            None,
            attempts,
            None,
            None,
            started,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        descriptor: &LocatorDescriptor,
        outcome: ResolutionOutcome,
        method: ResolutionMethod,
        found: Option<(ContextPath, ElementHandle)>,
        attempts: Vec<ResolutionAttempt>,
        vision: Option<VisionResult>,
        failure_analysis: Option<failure_analyzer::FailureAnalysis>,
        started: Instant,
    ) -> ResolutionReport {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            session = %self.session,
            outcome = ?outcome,
            method = %method,
            attempts = attempts.len(),
            elapsed_ms,
            "resolution finished"
        );
        let (context_path, element) = found.unzip();
        ResolutionReport {
            description: descriptor.description.clone(),
            outcome,
            method,
            context_path,
            element,
            attempts,
            vision,
            failure_analysis,
            tracker: SuccessTracker::new().summary(descriptor),
            elapsed_ms,
        }
    }
}

async fn search_roots(
    navigator: &mut ContextNavigator<'_>,
    resolver: &StrategyResolver<'_>,
    descriptor: &mut LocatorDescriptor,
    attempts: &mut Vec<ResolutionAttempt>,
    cancel: &CancellationToken,
) -> Result<Option<ElementMatch>, RelocateError> {
    while let Some(visit) = navigator.next().await? {
        if cancel.is_cancelled() {
            attempts.push(ResolutionAttempt::new(
                AttemptMethod::Context,
                visit.path().clone(),
                AttemptOutcome::Cancelled,
            ));
            return Ok(None);
        }
        if let Some(attempt) = visit.attempt() {
            debug!(path = %visit.path(), outcome = attempt.outcome.label(), "context skipped");
            attempts.push(attempt);
        }
        let RootVisit::Searchable(root) = visit else {
            continue;
        };
        let resolution = resolver.resolve_in_root(descriptor, &root).await?;
        attempts.extend(resolution.attempts);
        if let Some(found) = resolution.matched {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn vision_query(
    descriptor: &LocatorDescriptor,
    screenshot: Screenshot,
    viewport: relocator_core_types::Viewport,
) -> VisionQuery {
    let mut query = VisionQuery::new(descriptor.description.clone(), screenshot, viewport)
        .with_visual_cues(descriptor.visual_cues.iter().cloned())
        .with_nearby_elements(descriptor.nearby_elements.iter().cloned());
    if let Some(tag) = &descriptor.expected.tag {
        query = query.with_expected("tag", tag.clone());
    }
    for (name, value) in &descriptor.expected.attributes {
        query = query.with_expected(name.clone(), value.clone());
    }
    query
}

fn vision_attempt(outcome: AttemptOutcome, started: &Instant) -> ResolutionAttempt {
    ResolutionAttempt::new(AttemptMethod::Vision, ContextPath::document(), outcome)
        .with_elapsed_ms(started.elapsed().as_millis() as u64)
}
