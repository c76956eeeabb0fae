//! Repair strategies and their registry.
//!
//! Each strategy acts on the host (lock files, dpkg state, the virtualenv)
//! and never on steps or results. `apply` is idempotent: on a healthy host
//! it removes nothing, recreates nothing, and the package-manager calls it
//! issues are no-ops.

use crate::config::ProvisionConfig;
use crate::runner::CommandRunner;
use crate::sink::LogSink;
use crate::step::{Directive, Step, StepCategory};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const PKG_LOCK_CLEAR: &str = "pkg-lock-clear";
pub const PKG_FIX_BROKEN: &str = "pkg-fix-broken";
pub const ENV_REBUILD: &str = "env-rebuild";

/// What one `apply` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    /// Every action the strategy attempted succeeded.
    pub succeeded: bool,

    /// Human-readable list of actions taken, in order.
    pub actions: Vec<String>,
}

impl RepairOutcome {
    fn new() -> Self {
        Self {
            succeeded: true,
            actions: Vec::new(),
        }
    }

    fn record(&mut self, action: impl Into<String>, ok: bool) {
        let action = action.into();
        self.actions
            .push(if ok { action } else { format!("{} (failed)", action) });
        self.succeeded &= ok;
    }
}

/// A named remediation tied to a step category.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn id(&self) -> &'static str;

    /// Whether this strategy applies to a failed `step`.
    fn matches(&self, step: &Step) -> bool;

    /// Remediate the host. `Err` means the strategy could not run at all.
    async fn apply(&self) -> Result<RepairOutcome>;
}

/// Shared handles every strategy needs.
#[derive(Clone)]
pub struct RepairContext {
    pub runner: Arc<dyn CommandRunner>,
    pub sink: Arc<LogSink>,
}

impl RepairContext {
    pub fn new(runner: Arc<dyn CommandRunner>, sink: Arc<LogSink>) -> Self {
        Self { runner, sink }
    }

    /// Run a directive for a repair, folding invocation errors into the outcome.
    async fn run_into(&self, outcome: &mut RepairOutcome, directive: Directive) {
        let label = directive.display();
        let ok = match self.runner.run(&directive).await {
            Ok(output) => output.succeeded,
            Err(e) => {
                debug!(command = %label, error = %e, "repair command could not run");
                false
            }
        };
        outcome.record(label, ok);
    }
}

// ---------------------------------------------------------------------------
// pkg-lock-clear
// ---------------------------------------------------------------------------

/// Releases stale package-database locks and finishes interrupted installs.
pub struct PkgLockClear {
    ctx: RepairContext,
    lock_files: Vec<PathBuf>,
}

impl PkgLockClear {
    pub fn new(ctx: RepairContext, lock_files: Vec<PathBuf>) -> Self {
        Self { ctx, lock_files }
    }
}

#[async_trait]
impl RepairStrategy for PkgLockClear {
    fn id(&self) -> &'static str {
        PKG_LOCK_CLEAR
    }

    fn matches(&self, step: &Step) -> bool {
        step.category == StepCategory::PackageManager
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let mut outcome = RepairOutcome::new();

        for lock in &self.lock_files {
            match tokio::fs::remove_file(lock).await {
                Ok(()) => outcome.record(format!("removed {}", lock.display()), true),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    outcome.record(format!("remove {}: {}", lock.display(), e), false);
                }
            }
        }

        self.ctx
            .run_into(&mut outcome, Directive::exec(["dpkg", "--configure", "-a"]))
            .await;
        self.ctx
            .run_into(&mut outcome, Directive::exec(["apt-get", "install", "-f", "-y"]))
            .await;

        self.ctx
            .sink
            .append(PKG_LOCK_CLEAR, &outcome.actions.join("\n"));
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// pkg-fix-broken
// ---------------------------------------------------------------------------

/// Runs the package manager's own dependency repair.
pub struct PkgFixBroken {
    ctx: RepairContext,
}

impl PkgFixBroken {
    pub fn new(ctx: RepairContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RepairStrategy for PkgFixBroken {
    fn id(&self) -> &'static str {
        PKG_FIX_BROKEN
    }

    fn matches(&self, step: &Step) -> bool {
        step.category == StepCategory::PackageManager
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let mut outcome = RepairOutcome::new();
        self.ctx
            .run_into(
                &mut outcome,
                Directive::exec(["apt-get", "--fix-broken", "install", "-y"]),
            )
            .await;
        self.ctx
            .sink
            .append(PKG_FIX_BROKEN, &outcome.actions.join("\n"));
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// env-rebuild
// ---------------------------------------------------------------------------

/// Rebuilds the Python virtualenv when it is structurally incomplete, then
/// refreshes pip and the declared dependencies.
pub struct EnvRebuild {
    ctx: RepairContext,
    venv_dir: PathBuf,
    requirements: PathBuf,
    packages: Vec<String>,
}

impl EnvRebuild {
    pub fn new(
        ctx: RepairContext,
        venv_dir: PathBuf,
        requirements: PathBuf,
        packages: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            venv_dir,
            requirements,
            packages,
        }
    }

    pub fn from_config(ctx: RepairContext, config: &ProvisionConfig) -> Self {
        Self::new(
            ctx,
            config.venv_dir.clone(),
            config.requirements_file(),
            config.python_packages.clone(),
        )
    }

    fn python(&self) -> PathBuf {
        self.venv_dir.join("bin").join("python")
    }

    fn pip(&self) -> PathBuf {
        self.venv_dir.join("bin").join("pip")
    }

    /// A venv missing its interpreter or installer cannot be repaired in place.
    pub fn is_incomplete(&self) -> bool {
        !self.python().exists() || !self.pip().exists()
    }
}

#[async_trait]
impl RepairStrategy for EnvRebuild {
    fn id(&self) -> &'static str {
        ENV_REBUILD
    }

    fn matches(&self, step: &Step) -> bool {
        step.category == StepCategory::PythonEnv
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let mut outcome = RepairOutcome::new();

        if self.is_incomplete() {
            match tokio::fs::remove_dir_all(&self.venv_dir).await {
                Ok(()) => outcome.record(format!("removed {}", self.venv_dir.display()), true),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    outcome.record(format!("remove {}: {}", self.venv_dir.display(), e), false)
                }
            }
            self.ctx
                .run_into(
                    &mut outcome,
                    Directive::exec([
                        "python3".to_string(),
                        "-m".to_string(),
                        "venv".to_string(),
                        self.venv_dir.display().to_string(),
                    ]),
                )
                .await;
        }

        let python = self.python().display().to_string();
        self.ctx
            .run_into(
                &mut outcome,
                Directive::exec([
                    python.as_str(),
                    "-m",
                    "pip",
                    "install",
                    "--upgrade",
                    "pip",
                ]),
            )
            .await;

        let pip = self.pip().display().to_string();
        if self.requirements.exists() {
            self.ctx
                .run_into(
                    &mut outcome,
                    Directive::exec([
                        pip.clone(),
                        "install".to_string(),
                        "-r".to_string(),
                        self.requirements.display().to_string(),
                    ]),
                )
                .await;
        } else if !self.packages.is_empty() {
            let mut argv = vec![pip, "install".to_string()];
            argv.extend(self.packages.iter().cloned());
            self.ctx
                .run_into(&mut outcome, Directive::Exec { argv })
                .await;
        }

        self.ctx.sink.append(ENV_REBUILD, &outcome.actions.join("\n"));
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of strategies. Registration order is priority order.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn RepairStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, strategy: Arc<dyn RepairStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// The built-in strategies: package-manager repairs before environment repairs.
    pub fn standard(config: &ProvisionConfig, ctx: RepairContext) -> Self {
        Self::new()
            .register(Arc::new(PkgLockClear::new(
                ctx.clone(),
                config.lock_files.clone(),
            )))
            .register(Arc::new(PkgFixBroken::new(ctx.clone())))
            .register(Arc::new(EnvRebuild::from_config(ctx, config)))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn RepairStrategy>> {
        self.strategies.iter().find(|s| s.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RepairStrategy>> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedRunner;
    use tempfile::tempdir;

    fn ctx(runner: Arc<ScriptedRunner>) -> RepairContext {
        RepairContext::new(runner, Arc::new(LogSink::memory()))
    }

    #[tokio::test]
    async fn test_lock_clear_removes_present_locks_only() {
        let dir = tempdir().unwrap();
        let held = dir.path().join("lock-frontend");
        let absent = dir.path().join("lock");
        std::fs::write(&held, b"").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let strategy = PkgLockClear::new(ctx(runner.clone()), vec![held.clone(), absent]);
        let outcome = strategy.apply().await.unwrap();

        assert!(outcome.succeeded);
        assert!(!held.exists());
        assert_eq!(outcome.actions.len(), 3);
        assert_eq!(
            runner.calls(),
            vec!["dpkg --configure -a", "apt-get install -f -y"]
        );
    }

    #[tokio::test]
    async fn test_lock_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let lock = dir.path().join("lock");
        std::fs::write(&lock, b"").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let strategy = PkgLockClear::new(ctx(runner.clone()), vec![lock.clone()]);

        let first = strategy.apply().await.unwrap();
        let second = strategy.apply().await.unwrap();

        assert!(first.actions[0].starts_with("removed"));
        assert!(second.actions.iter().all(|a| !a.starts_with("removed")));
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_lock_clear_reports_command_failure() {
        let runner = Arc::new(ScriptedRunner::new().always_fail("dpkg --configure"));
        let strategy = PkgLockClear::new(ctx(runner.clone()), Vec::new());
        let outcome = strategy.apply().await.unwrap();

        assert!(!outcome.succeeded);
        // the apt-get repair still ran after dpkg failed
        assert_eq!(runner.count("apt-get install -f"), 1);
    }

    #[tokio::test]
    async fn test_fix_broken_invokes_apt() {
        let runner = Arc::new(ScriptedRunner::new());
        let outcome = PkgFixBroken::new(ctx(runner.clone())).apply().await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(runner.calls(), vec!["apt-get --fix-broken install -y"]);
    }

    #[tokio::test]
    async fn test_env_rebuild_recreates_incomplete_venv() {
        let dir = tempdir().unwrap();
        let venv = dir.path().join("venv");
        std::fs::create_dir_all(venv.join("lib")).unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let strategy = EnvRebuild::new(
            ctx(runner.clone()),
            venv.clone(),
            dir.path().join("requirements.txt"),
            vec!["flask".into()],
        );
        assert!(strategy.is_incomplete());

        let outcome = strategy.apply().await.unwrap();
        assert!(outcome.succeeded);
        assert!(!venv.join("lib").exists());
        assert_eq!(runner.count("-m venv"), 1);
        assert_eq!(runner.count("install --upgrade pip"), 1);
        assert_eq!(runner.count("install flask"), 1);
    }

    #[tokio::test]
    async fn test_env_rebuild_keeps_healthy_venv() {
        let dir = tempdir().unwrap();
        let venv = dir.path().join("venv");
        std::fs::create_dir_all(venv.join("bin")).unwrap();
        std::fs::write(venv.join("bin").join("python"), b"").unwrap();
        std::fs::write(venv.join("bin").join("pip"), b"").unwrap();
        let requirements = dir.path().join("requirements.txt");
        std::fs::write(&requirements, b"flask\n").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let strategy = EnvRebuild::new(ctx(runner.clone()), venv.clone(), requirements, vec![]);

        strategy.apply().await.unwrap();
        strategy.apply().await.unwrap();

        assert_eq!(runner.count("-m venv"), 0);
        assert_eq!(runner.count("install -r"), 2);
        assert!(venv.join("bin").join("python").exists());
    }

    #[test]
    fn test_standard_registry_priority_order() {
        let runner = Arc::new(ScriptedRunner::new());
        let registry = StrategyRegistry::standard(&ProvisionConfig::default(), ctx(runner));

        assert_eq!(
            registry.ids(),
            vec![PKG_LOCK_CLEAR, PKG_FIX_BROKEN, ENV_REBUILD]
        );
        assert!(registry.get(ENV_REBUILD).is_some());
        assert!(registry.get("unknown").is_none());
    }
}
