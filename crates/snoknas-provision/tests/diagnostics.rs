use std::sync::Arc;

use snoknas_provision::diagnostics::{CommandProbe, CommandRemedy, FnProbe};
use snoknas_provision::fakes::{ScriptedRunner, ToggleProbe};
use snoknas_provision::{run_diagnostics, DiagnosticCheck, Directive, LogSink};

#[tokio::test]
async fn stopped_service_is_started_and_reprobed() {
    let sink = LogSink::memory();
    let probe = ToggleProbe::new(false);
    let remedy = probe.remedy(true);
    let check = DiagnosticCheck::new("service_running", Arc::new(probe.clone()))
        .with_remedy(Arc::new(remedy.clone()));

    let outcome = check.evaluate(&sink).await;

    assert!(outcome.healthy);
    assert!(!outcome.initially_healthy);
    assert!(outcome.remedy_attempted);
    assert_eq!(remedy.calls(), 1);
    assert_eq!(probe.probe_count(), 2);
}

#[tokio::test]
async fn healthy_probe_never_runs_remedy() {
    let sink = LogSink::memory();
    let probe = ToggleProbe::new(true);
    let remedy = probe.remedy(true);
    let check = DiagnosticCheck::new("venv_integrity", Arc::new(probe.clone()))
        .with_remedy(Arc::new(remedy.clone()));

    let outcome = check.evaluate(&sink).await;

    assert!(outcome.healthy);
    assert!(!outcome.remedy_attempted);
    assert_eq!(remedy.calls(), 0);
    assert_eq!(probe.probe_count(), 1);
}

#[tokio::test]
async fn command_backed_service_check() {
    let sink = LogSink::memory();
    let runner = Arc::new(ScriptedRunner::new().fail_times("is-active", 1));
    let check = DiagnosticCheck::new(
        "service_running",
        Arc::new(CommandProbe::new(
            runner.clone(),
            Directive::exec(["systemctl", "is-active", "--quiet", "snoknas"]),
        )),
    )
    .with_remedy(Arc::new(CommandRemedy::new(
        runner.clone(),
        vec![Directive::exec(["systemctl", "restart", "snoknas"])],
    )));

    let outcome = check.evaluate(&sink).await;

    assert!(outcome.healthy);
    assert_eq!(runner.count("systemctl restart snoknas"), 1);
    assert_eq!(runner.count("is-active"), 2);
}

#[tokio::test]
async fn concurrent_results_are_sorted_by_name() {
    let sink = LogSink::memory();
    let checks = vec![
        DiagnosticCheck::new("web_ui_built", Arc::new(FnProbe(|| false))),
        DiagnosticCheck::new("install_ownership", Arc::new(FnProbe(|| true))),
        DiagnosticCheck::new("venv_integrity", Arc::new(FnProbe(|| true))),
        DiagnosticCheck::new("service_running", Arc::new(FnProbe(|| true))),
    ];

    let outcomes = run_diagnostics(&checks, &sink).await;

    let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "install_ownership",
            "service_running",
            "venv_integrity",
            "web_ui_built"
        ]
    );
    assert_eq!(outcomes.iter().filter(|o| !o.healthy).count(), 1);
    assert_eq!(sink.entries().len(), 4);
}
