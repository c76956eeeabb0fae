//! Installation report and its on-disk artifact.

use crate::controller::ExecutionResult;
use crate::diagnostics::DiagnosticOutcome;
use crate::error::ProvisionError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Everything one install produced, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub steps: Vec<ExecutionResult>,
    /// Sorted by check name.
    pub diagnostics: Vec<DiagnosticOutcome>,
}

impl InstallationReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            dry_run,
            steps: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn passed_steps(&self) -> usize {
        self.steps.iter().filter(|r| r.succeeded).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.len() - self.passed_steps()
    }

    pub fn repaired_steps(&self) -> usize {
        self.steps.iter().filter(|r| r.was_repaired()).count()
    }

    pub fn unhealthy_checks(&self) -> usize {
        self.diagnostics.iter().filter(|d| !d.healthy).count()
    }

    /// Every step succeeded and every check ended healthy.
    pub fn is_healthy(&self) -> bool {
        self.failed_steps() == 0 && self.unhealthy_checks() == 0
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Compact view for front ends that only need final statuses.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            run_id: self.run_id,
            dry_run: self.dry_run,
            steps: self
                .steps
                .iter()
                .map(|r| StepSummary {
                    description: r.step.description.clone(),
                    succeeded: r.succeeded,
                    attempts: r.attempts,
                    repair_applied: r.repair_applied.clone(),
                })
                .collect(),
            checks: self
                .diagnostics
                .iter()
                .map(|d| CheckSummary {
                    name: d.name.clone(),
                    healthy: d.healthy,
                    remedied: d.remedy_attempted,
                })
                .collect(),
            failed_steps: self.failed_steps(),
            unhealthy_checks: self.unhealthy_checks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub description: String,
    pub succeeded: bool,
    pub attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_applied: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub name: String,
    pub healthy: bool,
    pub remedied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub steps: Vec<StepSummary>,
    pub checks: Vec<CheckSummary>,
    pub failed_steps: usize,
    pub unhealthy_checks: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist the report as `<dir>/<run_id>/report.json` with a SHA-256
/// digest alongside it in `report.digest`.
pub fn write_report_artifact(report: &InstallationReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(report.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("report.json");
    let digest_path = run_dir.join("report.digest");
    let json = serde_json::to_vec_pretty(report)?;

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, sha256_hex(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<run_id>/report.json` and verify it against its digest.
pub fn read_report_artifact(run_id: &Uuid, dir: &Path) -> Result<InstallationReport> {
    let run_dir = dir.join(run_id.to_string());
    let json = std::fs::read(run_dir.join("report.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("report.digest"))?;

    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(ProvisionError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
