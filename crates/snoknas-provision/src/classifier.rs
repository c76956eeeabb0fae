//! Failure classification.
//!
//! Selection is static per step: it reads the step's declared category and
//! never the failure output. A package command that failed because the disk
//! is full still gets the package-lock repairs.

use crate::repair::{RepairStrategy, StrategyRegistry};
use crate::step::Step;
use std::sync::Arc;

/// Picks the repair strategies that apply to a failed step.
#[derive(Clone)]
pub struct FailureClassifier {
    registry: Arc<StrategyRegistry>,
}

impl FailureClassifier {
    pub fn new(registry: Arc<StrategyRegistry>) -> Self {
        Self { registry }
    }

    /// Matching strategies, in registry priority order.
    pub fn classify(&self, step: &Step) -> Vec<Arc<dyn RepairStrategy>> {
        self.registry
            .iter()
            .filter(|strategy| strategy.matches(step))
            .cloned()
            .collect()
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }
}
