//! SnokNAS installer
//!
//! Provisions a host for the SnokNAS storage dashboard: system packages,
//! the Python backend and its virtualenv, the web UI and the systemd
//! service. Failed steps are repaired and retried once; the install never
//! stops on a broken step and ends with a post-install health check.
//!
//! ## Commands
//!
//! - `install`: run the plan and diagnostics, print the final report
//! - `plan`: print the plan that `install` would run

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use snoknas_provision::precondition;
use snoknas_provision::snoknas::default_plan;
use snoknas_provision::telemetry::init_tracing;
use snoknas_provision::{
    write_report_artifact, CommandRunner, DryRunRunner, InstallationPlan, Installer, LogSink,
    ProvisionConfig, ShellRunner,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "snoknas-install")]
#[command(author = "SnokNAS Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install and self-repair the SnokNAS dashboard", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Install root (default: /opt/snoknas)
    #[arg(long)]
    install_dir: Option<PathBuf>,

    /// Source tree containing backend/ and frontend/
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Custom plan file (JSON) replacing the built-in plan
    #[arg(long, env = "SNOKNAS_PLAN")]
    plan: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the installation plan followed by post-install diagnostics
    Install {
        #[command(flatten)]
        args: PlanArgs,

        /// Append-only install log
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Directory for report artifacts
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Per-directive timeout in seconds
        #[arg(long)]
        step_timeout: Option<u64>,

        /// Log every directive without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the plan without running it
    Plan {
        #[command(flatten)]
        args: PlanArgs,
    },
}

fn resolve(args: &PlanArgs) -> Result<(ProvisionConfig, InstallationPlan)> {
    let mut config = ProvisionConfig::from_env();
    if let Some(dir) = &args.install_dir {
        config = config.with_install_dir(dir);
    }
    if let Some(dir) = &args.source_dir {
        config.source_dir = dir.clone();
    }

    let plan = match &args.plan {
        Some(path) => InstallationPlan::load(path)
            .with_context(|| format!("Failed to load plan from {}", path.display()))?,
        None => default_plan(&config),
    };
    Ok((config, plan))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Install {
            args,
            log_file,
            report_dir,
            step_timeout,
            dry_run,
        } => {
            let (mut config, plan) = resolve(&args)?;
            if let Some(path) = log_file {
                config.log_file = path;
            }
            if let Some(dir) = report_dir {
                config.report_dir = dir;
            }
            if step_timeout.is_some() {
                config.step_timeout_secs = step_timeout;
            }
            cmd_install(config, plan, dry_run, args.output).await
        }
        Commands::Plan { args } => {
            let (_, plan) = resolve(&args)?;
            cmd_plan(&plan, args.output)
        }
    }
}

async fn cmd_install(
    config: ProvisionConfig,
    plan: InstallationPlan,
    dry_run: bool,
    output: OutputFormat,
) -> Result<()> {
    precondition::check(&config, &plan, dry_run).context("Cannot start installation")?;

    let sink = match LogSink::open(&config.log_file) {
        Ok(sink) => Arc::new(sink),
        Err(e) if dry_run => {
            warn!(path = %config.log_file.display(), error = %e, "install log unavailable, keeping dry-run log in memory");
            Arc::new(LogSink::memory())
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to open install log {}", config.log_file.display())
            })
        }
    };

    let runner: Arc<dyn CommandRunner> = if dry_run {
        Arc::new(DryRunRunner::new(sink.clone()))
    } else {
        Arc::new(ShellRunner::new(sink.clone()).with_timeout_secs(config.step_timeout_secs))
    };

    info!(
        install_dir = %config.install_dir.display(),
        steps = plan.step_count(),
        dry_run = dry_run,
        "starting installation"
    );
    let installer = Installer::for_config(&config, plan, runner, sink).dry_run(dry_run);
    let report = installer.run().await;

    if !dry_run {
        match write_report_artifact(&report, &config.report_dir) {
            Ok(path) => info!(path = %path.display(), "report written"),
            Err(e) => warn!(error = %e, "failed to write report artifact"),
        }
    }

    match output {
        OutputFormat::Text => print!("{}", render::report_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary())?),
    }

    // Step and check failures are in the report; they do not change the exit status.
    Ok(())
}

fn cmd_plan(plan: &InstallationPlan, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => print!("{}", render::plan_text(plan)),
        OutputFormat::Json => println!("{}", plan.to_json()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parses_install_flags() {
        let cli = Cli::try_parse_from([
            "snoknas-install",
            "--verbose",
            "install",
            "--install-dir",
            "/srv/snoknas",
            "--dry-run",
            "--output",
            "json",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Install { args, dry_run, .. } => {
                assert!(dry_run);
                assert_eq!(args.install_dir, Some(PathBuf::from("/srv/snoknas")));
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Commands::Plan { .. } => panic!("expected install"),
        }
    }

    #[test]
    fn test_resolve_loads_custom_plan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"phases":[{"name":"only","steps":[{"description":"hello","command":{"kind":"exec","argv":["true"]}}]}]}"#,
        )
        .unwrap();

        let args = PlanArgs {
            install_dir: Some(dir.path().join("opt")),
            source_dir: None,
            plan: Some(path),
            output: OutputFormat::Text,
        };
        let (config, plan) = resolve(&args).unwrap();
        assert_eq!(config.install_dir, dir.path().join("opt"));
        assert_eq!(plan.step_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_source_tree_fails_before_any_step() {
        let dir = tempdir().unwrap();
        let mut config = ProvisionConfig::default().with_install_dir(dir.path().join("opt"));
        config.source_dir = dir.path().join("src");
        config.log_file = dir.path().join("install.log");
        let plan = default_plan(&config);

        let err = cmd_install(config, plan, true, OutputFormat::Text)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("required path is missing"));
        assert!(!dir.path().join("install.log").exists());
    }

    #[tokio::test]
    async fn test_dry_run_install_completes() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/backend")).unwrap();
        let mut config = ProvisionConfig::default().with_install_dir(dir.path().join("opt"));
        config.source_dir = dir.path().join("src");
        config.log_file = dir.path().join("install.log");
        config.report_dir = dir.path().join("reports");
        let plan = default_plan(&config);

        cmd_install(config, plan, true, OutputFormat::Json).await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("install.log")).unwrap();
        assert!(log.contains("[dry-run] $ apt-get update"));
        assert!(!dir.path().join("reports").exists());
    }
}
