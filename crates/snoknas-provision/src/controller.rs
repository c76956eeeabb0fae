//! Retry controller: run, repair, retry once.
//!
//! ```text
//! Pending -> Running -> Succeeded
//!                    -> NeedsRepair -> Repairing -> Retrying -> Succeeded | Failed
//! ```
//!
//! `Failed` is an ordinary terminal state. The controller never raises for
//! a failed step; the outcome is returned as an [`ExecutionResult`].

use crate::classifier::FailureClassifier;
use crate::obs;
use crate::runner::CommandRunner;
use crate::sink::LogSink;
use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of one step inside the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    NeedsRepair,
    Repairing,
    Retrying,
    Succeeded,
    Failed,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Succeeded | StepState::Failed)
    }

    pub fn can_transition_to(&self, next: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, NeedsRepair)
                | (NeedsRepair, Repairing)
                | (Repairing, Retrying)
                | (Retrying, Succeeded)
                | (Retrying, Failed)
        )
    }
}

/// One strategy invocation made while repairing a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub id: String,
    pub succeeded: bool,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final outcome of a step. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step: Step,

    /// 1 or 2.
    pub attempts: u8,

    pub succeeded: bool,

    /// Output of every attempt and repair, in order.
    pub log: String,

    /// First matched strategy id, set only when the first attempt failed.
    pub repair_applied: Option<String>,

    /// Every strategy run for this step, in priority order.
    #[serde(default)]
    pub repairs: Vec<RepairRecord>,

    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn was_repaired(&self) -> bool {
        self.succeeded && self.attempts == 2
    }
}

/// Applies the run / repair / retry-once policy to a step.
pub struct RetryController {
    runner: Arc<dyn CommandRunner>,
    classifier: FailureClassifier,
    sink: Arc<LogSink>,
}

impl RetryController {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        classifier: FailureClassifier,
        sink: Arc<LogSink>,
    ) -> Self {
        Self {
            runner,
            classifier,
            sink,
        }
    }

    /// Drive `step` to a terminal state.
    pub async fn execute(&self, step: &Step) -> ExecutionResult {
        let start = Instant::now();
        let mut state = StepState::Pending;
        let mut log = String::new();

        advance(&mut state, StepState::Running, step);
        let first = self.attempt(step, 1, &mut log).await;
        if first {
            advance(&mut state, StepState::Succeeded, step);
            return self.finish(step, 1, true, log, None, Vec::new(), start);
        }

        advance(&mut state, StepState::NeedsRepair, step);
        let strategies = self.classifier.classify(step);
        let repair_applied = strategies.first().map(|s| s.id().to_string());

        advance(&mut state, StepState::Repairing, step);
        let mut repairs = Vec::with_capacity(strategies.len());
        for strategy in &strategies {
            let record = match strategy.apply().await {
                Ok(outcome) => {
                    obs::emit_repair_applied(strategy.id(), &step.description, outcome.succeeded);
                    RepairRecord {
                        id: strategy.id().to_string(),
                        succeeded: outcome.succeeded,
                        actions: outcome.actions,
                        error: None,
                    }
                }
                Err(e) => {
                    obs::emit_repair_error(strategy.id(), &e);
                    self.sink
                        .append(strategy.id(), &format!("could not run: {}", e));
                    RepairRecord {
                        id: strategy.id().to_string(),
                        succeeded: false,
                        actions: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            log.push_str(&format!(
                "--- repair {} ({})\n",
                record.id,
                if record.succeeded { "ok" } else { "failed" }
            ));
            for action in &record.actions {
                log.push_str(action);
                log.push('\n');
            }
            repairs.push(record);
        }

        advance(&mut state, StepState::Retrying, step);
        let second = self.attempt(step, 2, &mut log).await;
        let terminal = if second {
            StepState::Succeeded
        } else {
            StepState::Failed
        };
        advance(&mut state, terminal, step);

        self.finish(step, 2, second, log, repair_applied, repairs, start)
    }

    async fn attempt(&self, step: &Step, n: u8, log: &mut String) -> bool {
        log.push_str(&format!("--- attempt {}: {}\n", n, step.command.display()));
        match self.runner.run(&step.command).await {
            Ok(output) => {
                log.push_str(&output.log);
                if !output.log.is_empty() && !output.log.ends_with('\n') {
                    log.push('\n');
                }
                output.succeeded
            }
            Err(e) => {
                warn!(step = %step.description, attempt = n, error = %e, "step could not be invoked");
                log.push_str(&format!("could not run: {}\n", e));
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        step: &Step,
        attempts: u8,
        succeeded: bool,
        log: String,
        repair_applied: Option<String>,
        repairs: Vec<RepairRecord>,
        start: Instant,
    ) -> ExecutionResult {
        obs::emit_step_finished(
            &step.description,
            succeeded,
            attempts,
            repair_applied.as_deref(),
        );
        self.sink.append(
            "step",
            &format!(
                "{}: {} after {} attempt(s){}",
                step.description,
                if succeeded { "succeeded" } else { "FAILED" },
                attempts,
                repair_applied
                    .as_deref()
                    .map(|id| format!(", repair {}", id))
                    .unwrap_or_default()
            ),
        );

        ExecutionResult {
            step: step.clone(),
            attempts,
            succeeded,
            log,
            repair_applied,
            repairs,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn advance(state: &mut StepState, next: StepState, step: &Step) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {:?} -> {:?}",
        state,
        next
    );
    debug!(step = %step.description, from = ?state, to = ?next, "step transition");
    *state = next;
}
