//! Post-install diagnostics.
//!
//! Each [`DiagnosticCheck`] pairs a probe with an optional remedy. A failing
//! probe triggers the remedy once, followed by exactly one re-probe. Checks
//! own disjoint resources, so [`run_diagnostics`] evaluates them
//! concurrently and sorts the outcomes by name.

use crate::error::ProvisionError;
use crate::obs;
use crate::repair::RepairStrategy;
use crate::runner::CommandRunner;
use crate::sink::LogSink;
use crate::step::Directive;
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Reports whether a resource is healthy.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Attempts to make a failing probe pass.
#[async_trait]
pub trait Remedy: Send + Sync {
    async fn remedy(&self) -> Result<()>;
}

/// A named probe with an optional remedy.
#[derive(Clone)]
pub struct DiagnosticCheck {
    name: String,
    probe: Arc<dyn Probe>,
    remedy: Option<Arc<dyn Remedy>>,
}

impl std::fmt::Debug for DiagnosticCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticCheck")
            .field("name", &self.name)
            .field("has_remedy", &self.remedy.is_some())
            .finish()
    }
}

impl DiagnosticCheck {
    pub fn new(name: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: name.into(),
            probe,
            remedy: None,
        }
    }

    pub fn with_remedy(mut self, remedy: Arc<dyn Remedy>) -> Self {
        self.remedy = Some(remedy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_remedy(&self) -> bool {
        self.remedy.is_some()
    }

    /// Probe, remedy at most once, re-probe at most once.
    pub async fn evaluate(&self, sink: &LogSink) -> DiagnosticOutcome {
        if self.probe.probe().await {
            sink.append("check", &format!("{}: healthy", self.name));
            obs::emit_check_evaluated(&self.name, true, false);
            return DiagnosticOutcome {
                name: self.name.clone(),
                healthy: true,
                initially_healthy: true,
                remedy_attempted: false,
                remedy_error: None,
            };
        }

        let Some(remedy) = &self.remedy else {
            sink.append("check", &format!("{}: unhealthy, no remedy", self.name));
            obs::emit_check_evaluated(&self.name, false, false);
            return DiagnosticOutcome {
                name: self.name.clone(),
                healthy: false,
                initially_healthy: false,
                remedy_attempted: false,
                remedy_error: None,
            };
        };

        let remedy_error = remedy.remedy().await.err().map(|e| e.to_string());
        let healthy = self.probe.probe().await;
        sink.append(
            "check",
            &format!(
                "{}: unhealthy, remedied -> {}{}",
                self.name,
                if healthy { "healthy" } else { "still unhealthy" },
                remedy_error
                    .as_deref()
                    .map(|e| format!(" (remedy error: {})", e))
                    .unwrap_or_default()
            ),
        );
        obs::emit_check_evaluated(&self.name, healthy, true);

        DiagnosticOutcome {
            name: self.name.clone(),
            healthy,
            initially_healthy: false,
            remedy_attempted: true,
            remedy_error,
        }
    }
}

/// Final status of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticOutcome {
    pub name: String,

    /// Status after the optional remedy and re-probe.
    pub healthy: bool,

    pub initially_healthy: bool,

    pub remedy_attempted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy_error: Option<String>,
}

/// Evaluate all checks concurrently; outcomes are sorted by check name.
pub async fn run_diagnostics(checks: &[DiagnosticCheck], sink: &LogSink) -> Vec<DiagnosticOutcome> {
    let mut outcomes = join_all(checks.iter().map(|check| check.evaluate(sink))).await;
    outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    outcomes
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Healthy iff the directive runs and succeeds.
pub struct CommandProbe {
    runner: Arc<dyn CommandRunner>,
    directive: Directive,
}

impl CommandProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, directive: Directive) -> Self {
        Self { runner, directive }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn probe(&self) -> bool {
        matches!(self.runner.run(&self.directive).await, Ok(output) if output.succeeded)
    }
}

/// Healthy iff every path exists.
pub struct PathProbe {
    paths: Vec<PathBuf>,
}

impl PathProbe {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Probe for PathProbe {
    async fn probe(&self) -> bool {
        self.paths.iter().all(|p| p.exists())
    }
}

/// Probe backed by a closure.
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F> Probe for FnProbe<F>
where
    F: Fn() -> bool + Send + Sync,
{
    async fn probe(&self) -> bool {
        (self.0)()
    }
}

// ---------------------------------------------------------------------------
// Remedies
// ---------------------------------------------------------------------------

/// Runs directives in order, stopping at the first failure.
pub struct CommandRemedy {
    runner: Arc<dyn CommandRunner>,
    directives: Vec<Directive>,
}

impl CommandRemedy {
    pub fn new(runner: Arc<dyn CommandRunner>, directives: Vec<Directive>) -> Self {
        Self { runner, directives }
    }
}

#[async_trait]
impl Remedy for CommandRemedy {
    async fn remedy(&self) -> Result<()> {
        for directive in &self.directives {
            let output = self.runner.run(directive).await?;
            if !output.succeeded {
                return Err(ProvisionError::CommandFailed {
                    command: directive.display(),
                    detail: output
                        .exit_code
                        .map(|c| format!("exit code {}", c))
                        .unwrap_or_else(|| output.log.trim().to_string()),
                });
            }
        }
        Ok(())
    }
}

/// Uses a repair strategy as a remedy.
pub struct StrategyRemedy {
    strategy: Arc<dyn RepairStrategy>,
}

impl StrategyRemedy {
    pub fn new(strategy: Arc<dyn RepairStrategy>) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl Remedy for StrategyRemedy {
    async fn remedy(&self) -> Result<()> {
        let outcome = self.strategy.apply().await?;
        if outcome.succeeded {
            Ok(())
        } else {
            Err(ProvisionError::CommandFailed {
                command: self.strategy.id().to_string(),
                detail: outcome.actions.join("; "),
            })
        }
    }
}

/// Remedy backed by a closure.
pub struct FnRemedy<F>(pub F);

#[async_trait]
impl<F> Remedy for FnRemedy<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    async fn remedy(&self) -> Result<()> {
        (self.0)()
    }
}
