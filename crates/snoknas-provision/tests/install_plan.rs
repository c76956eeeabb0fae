use std::sync::Arc;

use snoknas_provision::fakes::ScriptedRunner;
use snoknas_provision::snoknas::default_plan;
use snoknas_provision::{
    read_report_artifact, write_report_artifact, Directive, FailureClassifier, InstallationPlan,
    Installer, LogSink, Phase, ProvisionConfig, RepairContext, RetryController, Step,
    StrategyRegistry,
};
use tempfile::tempdir;

fn controller(runner: Arc<ScriptedRunner>, config: &ProvisionConfig) -> RetryController {
    let sink = Arc::new(LogSink::memory());
    let registry =
        StrategyRegistry::standard(config, RepairContext::new(runner.clone(), sink.clone()));
    RetryController::new(runner, FailureClassifier::new(Arc::new(registry)), sink)
}

fn test_config() -> ProvisionConfig {
    let mut config = ProvisionConfig::default().with_install_dir("/nonexistent/snoknas");
    config.source_dir = "/nonexistent/src".into();
    config.lock_files = Vec::new();
    config
}

fn three_phase_plan() -> InstallationPlan {
    InstallationPlan::new(vec![
        Phase::new("System packages")
            .step(Step::package("Update", Directive::exec(["apt-get", "update"])))
            .step(Step::package(
                "Install",
                Directive::exec(["apt-get", "install", "-y", "python3"]),
            )),
        Phase::new("Python runtime")
            .step(Step::python_env(
                "Create venv",
                Directive::exec(["python3", "-m", "venv", "/opt/snoknas/venv"]),
            ))
            .step(Step::python_env(
                "Install deps",
                Directive::exec(["/opt/snoknas/venv/bin/pip", "install", "flask"]),
            )),
        Phase::new("Background service").step(Step::generic(
            "Start service",
            Directive::exec(["systemctl", "restart", "snoknas"]),
        )),
    ])
}

#[tokio::test]
async fn one_result_per_step_in_declaration_order() {
    let config = test_config();
    let runner = Arc::new(ScriptedRunner::new());
    let plan = three_phase_plan();

    let results = plan.execute(&controller(runner, &config)).await;

    assert_eq!(results.len(), plan.step_count());
    let got: Vec<_> = results.iter().map(|r| r.step.description.as_str()).collect();
    let want: Vec<_> = plan.steps().map(|s| s.description.as_str()).collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn terminal_failure_does_not_stop_the_plan() {
    let config = test_config();
    let runner = Arc::new(ScriptedRunner::new().always_fail("python3 -m venv /opt/snoknas/venv"));
    let plan = three_phase_plan();

    let results = plan.execute(&controller(runner.clone(), &config)).await;

    let failed: Vec<_> = results.iter().filter(|r| !r.succeeded).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].step.description, "Create venv");
    assert_eq!(failed[0].attempts, 2);

    // later steps still ran, once each
    assert_eq!(runner.count("/opt/snoknas/venv/bin/pip install flask"), 1);
    assert_eq!(runner.count("systemctl restart snoknas"), 1);
    assert!(results
        .iter()
        .filter(|r| r.step.description != "Create venv")
        .all(|r| r.succeeded && r.attempts == 1));
}

#[tokio::test]
async fn installer_report_survives_artifact_roundtrip() {
    let config = test_config();
    let runner = Arc::new(ScriptedRunner::new().always_fail("&& npm"));
    let installer = Installer::for_config(
        &config,
        default_plan(&config),
        runner,
        Arc::new(LogSink::memory()),
    );

    let report = installer.run().await;
    assert_eq!(report.steps.len(), installer.plan().step_count());
    assert_eq!(report.failed_steps(), 2);
    assert!(!report.is_healthy());

    let dir = tempdir().unwrap();
    write_report_artifact(&report, dir.path()).unwrap();
    let loaded = read_report_artifact(&report.run_id, dir.path()).unwrap();
    assert_eq!(loaded.summary(), report.summary());
}

#[test]
fn builtin_plan_serializes_and_reloads() {
    let plan = default_plan(&test_config());
    let json = plan.to_json().unwrap();
    assert_eq!(InstallationPlan::from_json(&json).unwrap(), plan);
}
