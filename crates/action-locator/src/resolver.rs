//! Strategy evaluation inside one search root.

use std::time::Instant;

use tracing::{debug, info};

use crate::descriptor::LocatorDescriptor;
use crate::driver::{BrowserDriver, ElementHandle};
use crate::errors::{DriverError, LocatorError};
use crate::navigator::SearchRoot;
use crate::strategies::{self, Fit, Selection};
use crate::tracker::{attempt_order, DeclaredPriority, PriorityPolicy, SuccessTracker};
use crate::types::{
    AttemptMethod, AttemptOutcome, ContextPath, ExpectedProperties, LocatorStrategy, ResolutionAttempt,
    StrategyKind, StrategyTarget,
};

/// Element found by a structural strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMatch {
    pub element: ElementHandle,
    pub kind: StrategyKind,
    pub path: ContextPath,
}

/// Aggregate verdict for one root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOutcome {
    Matched,
    NoMatch,
    Ambiguous,
}

#[derive(Debug, Clone, Default)]
pub struct RootResolution {
    pub matched: Option<ElementMatch>,
    pub attempts: Vec<ResolutionAttempt>,
}

impl RootResolution {
    pub fn outcome(&self) -> RootOutcome {
        if self.matched.is_some() {
            RootOutcome::Matched
        } else if self
            .attempts
            .iter()
            .any(|attempt| matches!(attempt.outcome, AttemptOutcome::Ambiguous { .. }))
        {
            RootOutcome::Ambiguous
        } else {
            RootOutcome::NoMatch
        }
    }
}

struct StrategyVerdict {
    outcome: AttemptOutcome,
    hidden: usize,
    element: Option<ElementHandle>,
}

impl StrategyVerdict {
    fn outcome(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            hidden: 0,
            element: None,
        }
    }
}

/// Tries a descriptor's strategies against a root, updating their counters.
pub struct StrategyResolver<'a> {
    driver: &'a dyn BrowserDriver,
    tracker: SuccessTracker,
    policy: &'a dyn PriorityPolicy,
}

impl<'a> StrategyResolver<'a> {
    pub fn new(driver: &'a dyn BrowserDriver) -> Self {
        Self {
            driver,
            tracker: SuccessTracker::new(),
            policy: &DeclaredPriority,
        }
    }

    pub fn with_policy(mut self, policy: &'a dyn PriorityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Every strategy in attempt order until the first unique match. The
    /// driver must already be positioned in the root's frame.
    pub async fn resolve_in_root(
        &self,
        descriptor: &mut LocatorDescriptor,
        root: &SearchRoot,
    ) -> Result<RootResolution, LocatorError> {
        let order = attempt_order(self.policy, &descriptor.strategies);
        let expected = descriptor.expected.clone();
        let mut resolution = RootResolution::default();

        for index in order {
            let strategy = &descriptor.strategies[index];
            let kind = strategy.kind();
            if strategy.is_coordinates() && !root.path.is_top_document() {
                continue;
            }

            let started = Instant::now();
            let verdict = self.attempt(strategy, root, &expected).await?;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            self.tracker
                .record_attempt(&mut descriptor.strategies[index], &verdict.outcome);
            debug!(
                strategy = %kind,
                path = %root.path,
                outcome = verdict.outcome.label(),
                hidden = verdict.hidden,
                elapsed_ms,
                "strategy attempted"
            );

            resolution.attempts.push(
                ResolutionAttempt::new(
                    AttemptMethod::Strategy(kind),
                    root.path.clone(),
                    verdict.outcome,
                )
                .with_hidden_matches(verdict.hidden)
                .with_elapsed_ms(elapsed_ms),
            );

            if let Some(element) = verdict.element {
                info!(strategy = %kind, path = %root.path, element = %element, "element resolved");
                resolution.matched = Some(ElementMatch {
                    element,
                    kind,
                    path: root.path.clone(),
                });
                break;
            }
        }
        Ok(resolution)
    }

    async fn attempt(
        &self,
        strategy: &LocatorStrategy,
        root: &SearchRoot,
        expected: &ExpectedProperties,
    ) -> Result<StrategyVerdict, LocatorError> {
        let result = match &strategy.target {
            StrategyTarget::Coordinates(point) => self.attempt_point(*point).await,
            target => self.attempt_query(target, root, expected).await,
        };
        match result {
            Ok(verdict) => Ok(verdict),
            Err(err @ DriverError::Disconnected(_)) => Err(err.into()),
            Err(err) => Ok(StrategyVerdict::outcome(AttemptOutcome::Errored {
                message: err.to_string(),
            })),
        }
    }

    async fn attempt_query(
        &self,
        target: &StrategyTarget,
        root: &SearchRoot,
        expected: &ExpectedProperties,
    ) -> Result<StrategyVerdict, DriverError> {
        let Some(query) = strategies::query_for(target) else {
            return Ok(StrategyVerdict::outcome(AttemptOutcome::NoMatch));
        };
        let handles = self.driver.find_elements(&root.root, &query).await?;

        let mut hidden = 0;
        let mut candidates = Vec::with_capacity(handles.len());
        for handle in handles {
            let info = self.driver.describe(&handle).await?;
            let fit = strategies::fit(target, &info);
            if fit == Fit::Reject {
                continue;
            }
            if !info.displayed {
                hidden += 1;
                continue;
            }
            candidates.push((handle, info, fit));
        }

        let verdict = match strategies::select(target.kind(), candidates, expected) {
            Selection::Unique(element) => StrategyVerdict {
                outcome: AttemptOutcome::Matched,
                hidden,
                element: Some(element),
            },
            Selection::None => StrategyVerdict {
                outcome: AttemptOutcome::NoMatch,
                hidden,
                element: None,
            },
            Selection::Ambiguous(count) => StrategyVerdict {
                outcome: AttemptOutcome::Ambiguous { count },
                hidden,
                element: None,
            },
        };
        Ok(verdict)
    }

    async fn attempt_point(
        &self,
        point: relocator_core_types::Point,
    ) -> Result<StrategyVerdict, DriverError> {
        let viewport = self.driver.viewport().await?;
        if !viewport.contains(point) {
            debug!(%point, "recorded point outside viewport");
            return Ok(StrategyVerdict::outcome(AttemptOutcome::NoMatch));
        }
        let Some(element) = self.driver.element_at_point(point).await? else {
            return Ok(StrategyVerdict::outcome(AttemptOutcome::NoMatch));
        };
        let info = self.driver.describe(&element).await?;
        if !info.displayed {
            return Ok(StrategyVerdict {
                outcome: AttemptOutcome::NoMatch,
                hidden: 1,
                element: None,
            });
        }
        Ok(StrategyVerdict {
            outcome: AttemptOutcome::Matched,
            hidden: 0,
            element: Some(element),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RootHandle;
    use crate::mock::{MockDocument, MockDriver, MockNode};
    use crate::tracker::SuccessRateTieBreak;
    use relocator_core_types::Rect;

    async fn top_root(driver: &MockDriver) -> SearchRoot {
        SearchRoot {
            path: ContextPath::document(),
            root: driver.document_root().await.unwrap(),
        }
    }

    fn header(with_id: bool) -> MockDocument {
        let mut button = MockNode::new("button")
            .class("search-button new-style")
            .text("Search")
            .rect(Rect::new(1560.0, 0.0, 40.0, 28.0));
        if with_id {
            button = button.id("search-btn");
        }
        MockDocument::new().child(MockNode::new("header").child(button))
    }

    #[tokio::test]
    async fn highest_priority_strategy_wins() {
        let driver = MockDriver::new(header(true));
        let mut descriptor = LocatorDescriptor::builder("Search button")
            .class("search-button")
            .id("search-btn")
            .build()
            .unwrap();
        let root = top_root(&driver).await;

        let resolution = StrategyResolver::new(&driver)
            .resolve_in_root(&mut descriptor, &root)
            .await
            .unwrap();
        let matched = resolution.matched.unwrap();
        assert_eq!(matched.kind, StrategyKind::Identifier);
        assert_eq!(resolution.attempts.len(), 1);
        assert_eq!(descriptor.strategies[1].stats.success_count, 1);
        assert_eq!(descriptor.strategies[0].stats.attempts(), 0);
    }

    #[tokio::test]
    async fn missing_id_falls_through_to_class() {
        let driver = MockDriver::new(header(false));
        let mut descriptor = LocatorDescriptor::builder("Search button")
            .id("search-btn")
            .class("search-button")
            .build()
            .unwrap();
        let root = top_root(&driver).await;

        let resolution = StrategyResolver::new(&driver)
            .resolve_in_root(&mut descriptor, &root)
            .await
            .unwrap();
        assert_eq!(resolution.matched.unwrap().kind, StrategyKind::ClassName);
        assert_eq!(descriptor.strategies[0].stats.failure_count, 1);
        assert_eq!(descriptor.strategies[1].stats.success_count, 1);
        assert_eq!(resolution.attempts[0].outcome, AttemptOutcome::NoMatch);
    }

    #[tokio::test]
    async fn hidden_and_ambiguous_matches_are_soft_failures() {
        let page = MockDocument::new()
            .child(MockNode::new("button").class("go").text("Go"))
            .child(MockNode::new("button").class("go").text("Go"))
            .child(MockNode::new("button").id("submit").hidden());
        let driver = MockDriver::new(page);
        let mut descriptor = LocatorDescriptor::builder("Go button")
            .id("submit")
            .class("go")
            .build()
            .unwrap();
        let root = top_root(&driver).await;

        let resolution = StrategyResolver::new(&driver)
            .resolve_in_root(&mut descriptor, &root)
            .await
            .unwrap();
        assert!(resolution.matched.is_none());
        assert_eq!(resolution.outcome(), RootOutcome::Ambiguous);
        assert_eq!(resolution.attempts[0].hidden_matches, 1);
        assert_eq!(resolution.attempts[1].outcome, AttemptOutcome::Ambiguous { count: 2 });
        assert_eq!(descriptor.strategies[1].stats.failure_count, 1);
    }

    #[tokio::test]
    async fn invalid_selector_is_an_errored_attempt() {
        let driver = MockDriver::new(header(true));
        let mut descriptor = LocatorDescriptor::builder("Search button")
            .css("button[[")
            .priority(1)
            .id("search-btn")
            .build()
            .unwrap();
        let root = top_root(&driver).await;

        let resolution = StrategyResolver::new(&driver)
            .resolve_in_root(&mut descriptor, &root)
            .await
            .unwrap();
        assert!(matches!(
            resolution.attempts[0].outcome,
            AttemptOutcome::Errored { .. }
        ));
        assert_eq!(descriptor.strategies[0].stats.failure_count, 1);
        assert_eq!(resolution.matched.unwrap().kind, StrategyKind::Identifier);
    }

    #[tokio::test]
    async fn coordinates_only_run_in_top_document() {
        let driver = MockDriver::new(header(false));
        let mut descriptor = LocatorDescriptor::builder("Search button")
            .coordinates(1575.0, 14.0)
            .build()
            .unwrap();
        let shadow_like = SearchRoot {
            path: ContextPath::document().child_shadow("app-shell"),
            root: RootHandle("root-0".into()),
        };
        let resolution = StrategyResolver::new(&driver)
            .resolve_in_root(&mut descriptor, &shadow_like)
            .await
            .unwrap();
        assert!(resolution.attempts.is_empty());

        let root = top_root(&driver).await;
        let resolution = StrategyResolver::new(&driver)
            .with_policy(&SuccessRateTieBreak)
            .resolve_in_root(&mut descriptor, &root)
            .await
            .unwrap();
        assert_eq!(resolution.matched.unwrap().kind, StrategyKind::Coordinates);
    }
}
