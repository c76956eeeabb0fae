//! Top-level install driver: plan, then diagnostics, into one report.

use crate::classifier::FailureClassifier;
use crate::config::ProvisionConfig;
use crate::controller::RetryController;
use crate::diagnostics::{run_diagnostics, DiagnosticCheck};
use crate::obs;
use crate::plan::InstallationPlan;
use crate::repair::{RepairContext, StrategyRegistry};
use crate::report::InstallationReport;
use crate::runner::CommandRunner;
use crate::sink::LogSink;
use crate::snoknas;
use chrono::Utc;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

pub struct Installer {
    plan: InstallationPlan,
    controller: RetryController,
    checks: Vec<DiagnosticCheck>,
    sink: Arc<LogSink>,
    dry_run: bool,
}

impl Installer {
    pub fn new(
        plan: InstallationPlan,
        controller: RetryController,
        checks: Vec<DiagnosticCheck>,
        sink: Arc<LogSink>,
    ) -> Self {
        Self {
            plan,
            controller,
            checks,
            sink,
            dry_run: false,
        }
    }

    /// Wire `plan` to the standard repair strategies and checks for
    /// `config`, all sharing one runner and one log sink.
    pub fn for_config(
        config: &ProvisionConfig,
        plan: InstallationPlan,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<LogSink>,
    ) -> Self {
        let registry = StrategyRegistry::standard(
            config,
            RepairContext::new(runner.clone(), sink.clone()),
        );
        let checks = snoknas::standard_checks(config, runner.clone(), &registry);
        let classifier = FailureClassifier::new(Arc::new(registry));
        let controller = RetryController::new(runner, classifier, sink.clone());
        Self::new(plan, controller, checks, sink)
    }

    /// Skip post-install diagnostics and mark the report as a dry run.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn plan(&self) -> &InstallationPlan {
        &self.plan
    }

    /// Execute every step, then the diagnostics. Never fails: step and
    /// check failures are recorded in the report.
    pub async fn run(&self) -> InstallationReport {
        let run_id = Uuid::new_v4();
        let span = obs::install_span(&run_id.to_string());
        self.run_with_id(run_id).instrument(span).await
    }

    async fn run_with_id(&self, run_id: Uuid) -> InstallationReport {
        let mut report = InstallationReport::new(run_id, Utc::now(), self.dry_run);
        let id = run_id.to_string();

        obs::emit_install_started(&id, self.plan.phases.len(), self.plan.step_count());
        self.sink.append(
            "install",
            &format!(
                "run {} started: {} phases, {} steps{}",
                id,
                self.plan.phases.len(),
                self.plan.step_count(),
                if self.dry_run { " (dry run)" } else { "" }
            ),
        );

        report.steps = self.plan.execute(&self.controller).await;
        if !self.dry_run {
            report.diagnostics = run_diagnostics(&self.checks, &self.sink).await;
        }
        report.finished_at = Utc::now();

        obs::emit_install_finished(
            &id,
            report.duration_ms(),
            report.failed_steps(),
            report.unhealthy_checks(),
        );
        self.sink.append(
            "install",
            &format!(
                "run {} finished: {}/{} steps succeeded, {} unhealthy checks",
                id,
                report.passed_steps(),
                report.steps.len(),
                report.unhealthy_checks()
            ),
        );

        report
    }
}
