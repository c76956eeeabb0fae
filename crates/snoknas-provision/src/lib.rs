//! SnokNAS provisioning core.
//!
//! Runs an installation plan step by step, repairing and retrying a failed
//! step once before moving on, then evaluates post-install diagnostics.
//!
//! ## Key Components
//!
//! - `RetryController`: run / repair / retry-once state machine per step
//! - `FailureClassifier` + `StrategyRegistry`: category-driven repair selection
//! - `InstallationPlan`: ordered phases of steps, best-effort execution
//! - `DiagnosticCheck`: probe with an optional inline remedy
//! - `Installer`: drives the plan and diagnostics into an `InstallationReport`

pub mod classifier;
pub mod config;
pub mod controller;
pub mod diagnostics;
mod error;
pub mod fakes;
pub mod installer;
pub mod obs;
pub mod plan;
pub mod precondition;
pub mod repair;
pub mod report;
pub mod runner;
pub mod sink;
pub mod snoknas;
pub mod step;
pub mod telemetry;
pub mod unit;

pub use classifier::FailureClassifier;
pub use config::ProvisionConfig;
pub use controller::{ExecutionResult, RepairRecord, RetryController, StepState};
pub use diagnostics::{run_diagnostics, DiagnosticCheck, DiagnosticOutcome, Probe, Remedy};
pub use error::{ProvisionError, Result};
pub use installer::Installer;
pub use plan::{InstallationPlan, Phase};
pub use repair::{
    EnvRebuild, PkgFixBroken, PkgLockClear, RepairContext, RepairOutcome, RepairStrategy,
    StrategyRegistry, ENV_REBUILD, PKG_FIX_BROKEN, PKG_LOCK_CLEAR,
};
pub use report::{
    read_report_artifact, write_report_artifact, InstallationReport, ReportSummary,
};
pub use runner::{CommandOutput, CommandRunner, DryRunRunner, ShellRunner};
pub use sink::LogSink;
pub use step::{Directive, Step, StepCategory};
pub use unit::ServiceUnit;
