//! Console rendering of an installation report.

use snoknas_provision::{InstallationPlan, InstallationReport};
use std::fmt::Write;

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗"
    }
}

/// Plain-text end-of-run summary.
pub fn report_text(report: &InstallationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run ID: {}", report.run_id);
    if report.dry_run {
        let _ = writeln!(out, "Mode: dry run (nothing was executed)");
    }
    let _ = writeln!(out, "Duration: {}ms", report.duration_ms());
    let _ = writeln!(out);

    let _ = writeln!(out, "Steps:");
    for result in &report.steps {
        let mut line = format!(
            "  {} {} ({} attempt{})",
            mark(result.succeeded),
            result.step.description,
            result.attempts,
            if result.attempts == 1 { "" } else { "s" }
        );
        if let Some(id) = &result.repair_applied {
            let _ = write!(line, " [repair: {}]", id);
        }
        let _ = writeln!(out, "{}", line);
    }

    if !report.diagnostics.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Checks:");
        for check in &report.diagnostics {
            let note = match (check.remedy_attempted, &check.remedy_error) {
                (true, Some(err)) => format!(" (remedy failed: {})", err),
                (true, None) => " (remedied)".to_string(),
                _ => String::new(),
            };
            let _ = writeln!(out, "  {} {}{}", mark(check.healthy), check.name, note);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Summary: {}/{} steps succeeded ({} repaired), {}/{} checks healthy",
        report.passed_steps(),
        report.steps.len(),
        report.repaired_steps(),
        report.diagnostics.len() - report.unhealthy_checks(),
        report.diagnostics.len()
    );
    if report.dry_run {
        let _ = writeln!(out, "\n• Dry run complete; run without --dry-run to install");
    } else if report.is_healthy() {
        let _ = writeln!(out, "\n✓ SnokNAS installed successfully");
    } else {
        let _ = writeln!(out, "\n✗ Installation finished with problems; see the install log");
    }
    out
}

/// Phase and step listing for the `plan` subcommand.
pub fn plan_text(plan: &InstallationPlan) -> String {
    let mut out = String::new();
    for (i, phase) in plan.phases.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, phase.name);
        for step in &phase.steps {
            let _ = writeln!(
                out,
                "   - {} [{}]\n       {}",
                step.description,
                step.category.name(),
                step.command.display()
            );
        }
    }
    out
}
