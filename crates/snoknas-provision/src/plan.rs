//! Installation plan: ordered phases of ordered steps.

use crate::controller::{ExecutionResult, RetryController};
use crate::error::ProvisionError;
use crate::obs;
use crate::step::{Directive, Step, StepCategory};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// An ordered group of related steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// Ordered phases, executed strictly in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationPlan {
    pub phases: Vec<Phase>,
}

impl InstallationPlan {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// Reject plans containing directives that could never be invoked.
    /// Runs before any step so a malformed plan fails as a precondition.
    pub fn validate(&self) -> Result<()> {
        for step in self.steps() {
            if step.command.is_empty() {
                return Err(ProvisionError::EmptyCommand {
                    step: step.description.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run every step through `controller`. Failed steps never stop the
    /// plan: one result per declared step, in declaration order.
    pub async fn execute(&self, controller: &RetryController) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(self.step_count());

        for phase in &self.phases {
            obs::emit_phase_started(&phase.name, phase.steps.len());
            for step in &phase.steps {
                info!(phase = %phase.name, step = %step.description, "executing step");
                results.push(controller.execute(step).await);
            }
        }

        results
    }

    /// Load a plan from a JSON file. Steps may omit `category`, in which
    /// case it is inferred from the command text.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: PlanFile = serde_json::from_str(text)?;
        Ok(file.into())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// Plan files accept steps without a category.

#[derive(Deserialize)]
struct PlanFile {
    phases: Vec<PhaseFile>,
}

#[derive(Deserialize)]
struct PhaseFile {
    name: String,
    steps: Vec<StepFile>,
}

#[derive(Deserialize)]
struct StepFile {
    description: String,
    command: Directive,
    #[serde(default)]
    category: Option<StepCategory>,
}

impl From<PlanFile> for InstallationPlan {
    fn from(file: PlanFile) -> Self {
        let phases = file
            .phases
            .into_iter()
            .map(|phase| Phase {
                name: phase.name,
                steps: phase
                    .steps
                    .into_iter()
                    .map(|s| {
                        let category = s
                            .category
                            .unwrap_or_else(|| StepCategory::infer(&s.command.display()));
                        Step::new(s.description, s.command, category)
                    })
                    .collect(),
            })
            .collect();
        InstallationPlan { phases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InstallationPlan {
        InstallationPlan::new(vec![
            Phase::new("packages")
                .step(Step::package("Update", Directive::exec(["apt-get", "update"])))
                .step(Step::package(
                    "Install",
                    Directive::exec(["apt-get", "install", "-y", "python3"]),
                )),
            Phase::new("service").step(Step::generic(
                "Reload",
                Directive::exec(["systemctl", "daemon-reload"]),
            )),
        ])
    }

    #[test]
    fn test_step_count_and_order() {
        let plan = sample();
        assert_eq!(plan.step_count(), 3);
        let names: Vec<_> = plan.steps().map(|s| s.description.as_str()).collect();
        assert_eq!(names, vec!["Update", "Install", "Reload"]);
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut plan = sample();
        plan.phases[1]
            .steps
            .push(Step::generic("Broken", Directive::shell("  ")));

        let err = plan.validate().unwrap_err();
        assert!(matches!(err, ProvisionError::EmptyCommand { ref step } if step == "Broken"));
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip_keeps_categories() {
        let plan = sample();
        let json = plan.to_json().unwrap();
        assert_eq!(InstallationPlan::from_json(&json).unwrap(), plan);
    }

    #[test]
    fn test_plan_file_infers_missing_category() {
        let json = r#"{
            "phases": [{
                "name": "python",
                "steps": [
                    {"description": "venv", "command": {"kind": "shell", "script": "python3 -m venv /opt/x/venv"}},
                    {"description": "pkgs", "command": {"kind": "exec", "argv": ["apt-get", "update"]}},
                    {"description": "forced", "command": {"kind": "shell", "script": "apt-get update"}, "category": "generic"}
                ]
            }]
        }"#;
        let plan = InstallationPlan::from_json(json).unwrap();
        let categories: Vec<_> = plan.steps().map(|s| s.category).collect();
        assert_eq!(
            categories,
            vec![
                StepCategory::PythonEnv,
                StepCategory::PackageManager,
                StepCategory::Generic
            ]
        );
    }
}
