//! Strategy outcome tracking and attempt ordering.
//!
//! Counters live on each [`LocatorStrategy`] of the descriptor being resolved;
//! nothing here keeps process-wide state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::LocatorDescriptor;
use crate::types::{AttemptOutcome, LocatorStrategy, StrategyKind};

/// Applies attempt outcomes to strategy counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessTracker;

impl SuccessTracker {
    pub fn new() -> Self {
        Self
    }

    pub fn record_outcome(&self, strategy: &mut LocatorStrategy, succeeded: bool) {
        self.record_outcome_at(strategy, succeeded, Utc::now());
    }

    pub fn record_outcome_at(
        &self,
        strategy: &mut LocatorStrategy,
        succeeded: bool,
        at: DateTime<Utc>,
    ) {
        if succeeded {
            strategy.stats.success_count = strategy.stats.success_count.saturating_add(1);
        } else {
            strategy.stats.failure_count = strategy.stats.failure_count.saturating_add(1);
        }
        strategy.stats.last_attempted = Some(at);
        debug!(
            strategy = %strategy.kind(),
            succeeded,
            success_rate = strategy.success_rate(),
            "strategy outcome recorded"
        );
    }

    /// Map an attempt outcome onto the counters. Context-level and cancelled
    /// outcomes leave them untouched. Returns whether anything was recorded.
    pub fn record_attempt(&self, strategy: &mut LocatorStrategy, outcome: &AttemptOutcome) -> bool {
        match outcome {
            AttemptOutcome::Matched => self.record_outcome(strategy, true),
            AttemptOutcome::NoMatch
            | AttemptOutcome::Ambiguous { .. }
            | AttemptOutcome::Errored { .. } => self.record_outcome(strategy, false),
            AttemptOutcome::ContextUnreachable { .. } | AttemptOutcome::Cancelled => return false,
        }
        true
    }

    pub fn success_rate(&self, strategy: &LocatorStrategy) -> f64 {
        strategy.success_rate()
    }

    pub fn summary(&self, descriptor: &LocatorDescriptor) -> TrackerSummary {
        let strategies = descriptor
            .strategies
            .iter()
            .map(|strategy| StrategySummary {
                kind: strategy.kind(),
                value: strategy.target.to_string(),
                priority: strategy.priority,
                success_count: strategy.stats.success_count,
                failure_count: strategy.stats.failure_count,
                success_rate: strategy.success_rate(),
                last_attempted: strategy.stats.last_attempted,
            })
            .collect::<Vec<_>>();
        let total_attempts = strategies
            .iter()
            .map(|s| s.success_count + s.failure_count)
            .sum();
        TrackerSummary {
            description: descriptor.description.clone(),
            total_attempts,
            strategies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySummary {
    pub kind: StrategyKind,
    pub value: String,
    pub priority: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub last_attempted: Option<DateTime<Utc>>,
}

/// Per-descriptor statistics for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub description: String,
    pub total_attempts: u64,
    pub strategies: Vec<StrategySummary>,
}

/// Decides the order strategies are attempted in.
///
/// Implementations return indices into `strategies`. Coordinates strategies
/// are always moved to the end by [`attempt_order`], whatever the policy says.
pub trait PriorityPolicy: Send + Sync {
    fn order(&self, strategies: &[LocatorStrategy]) -> Vec<usize>;

    fn name(&self) -> &'static str;
}

/// Ascending priority, ties by declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredPriority;

impl PriorityPolicy for DeclaredPriority {
    fn order(&self, strategies: &[LocatorStrategy]) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..strategies.len()).collect();
        indices.sort_by_key(|&i| strategies[i].priority);
        indices
    }

    fn name(&self) -> &'static str {
        "declared-priority"
    }
}

/// Ascending priority, then higher success rate among equal priorities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessRateTieBreak;

impl PriorityPolicy for SuccessRateTieBreak {
    fn order(&self, strategies: &[LocatorStrategy]) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..strategies.len()).collect();
        indices.sort_by(|&a, &b| {
            strategies[a]
                .priority
                .cmp(&strategies[b].priority)
                .then_with(|| {
                    strategies[b]
                        .success_rate()
                        .total_cmp(&strategies[a].success_rate())
                })
        });
        indices
    }

    fn name(&self) -> &'static str {
        "success-rate-tie-break"
    }
}

/// Policy order with every coordinates strategy moved last.
pub fn attempt_order(policy: &dyn PriorityPolicy, strategies: &[LocatorStrategy]) -> Vec<usize> {
    let ordered = policy.order(strategies);
    let (mut structural, coordinates): (Vec<usize>, Vec<usize>) = ordered
        .into_iter()
        .filter(|&i| i < strategies.len())
        .partition(|&i| !strategies[i].is_coordinates());
    structural.extend(coordinates);
    structural
}
