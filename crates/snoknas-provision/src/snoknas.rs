//! The built-in SnokNAS install plan and post-install checks.

use crate::config::{shell_quote, ProvisionConfig};
use crate::diagnostics::{
    CommandProbe, CommandRemedy, DiagnosticCheck, PathProbe, StrategyRemedy,
};
use crate::plan::{InstallationPlan, Phase};
use crate::repair::{StrategyRegistry, ENV_REBUILD};
use crate::runner::CommandRunner;
use crate::step::{Directive, Step};
use crate::unit::ServiceUnit;
use std::path::Path;
use std::sync::Arc;

/// Copy the contents of `src` into `dst` when `src` exists.
fn copy_tree(src: &Path, dst: &Path) -> String {
    let (src, dst) = (shell_quote(src), shell_quote(dst));
    format!("if [ -d {src} ]; then mkdir -p {dst} && cp -a {src}/. {dst}/; fi")
}

/// Run an npm script in `dir` when it has a `package.json`.
fn npm_in(dir: &Path, args: &str) -> String {
    let dir = shell_quote(dir);
    format!("if [ -f {dir}/package.json ]; then cd {dir} && npm {args}; fi")
}

fn owner(config: &ProvisionConfig) -> String {
    format!("{0}:{0}", config.service_user)
}

/// Packages, application files, Python runtime, web UI, service.
pub fn default_plan(config: &ProvisionConfig) -> InstallationPlan {
    let install_dir = config.install_dir.display().to_string();
    let venv = config.venv_dir.display().to_string();
    let python = config.venv_python().display().to_string();
    let pip = shell_quote(&config.venv_pip());
    let requirements = shell_quote(&config.requirements_file());

    let packages = Phase::new("System packages")
        .step(Step::package(
            "Update package index",
            Directive::exec(["apt-get", "update"]),
        ))
        .step(Step::package(
            "Install system packages",
            Directive::shell(format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                config.system_packages.join(" ")
            )),
        ));

    let files = Phase::new("Application files")
        .step(Step::generic(
            "Create install directory",
            Directive::exec(["mkdir", "-p", install_dir.as_str()]),
        ))
        .step(Step::generic(
            "Deploy backend",
            Directive::shell(copy_tree(&config.source_backend(), &config.backend_dir())),
        ))
        .step(Step::generic(
            "Deploy web front end sources",
            Directive::shell(copy_tree(
                &config.source_frontend(),
                &config.frontend_dir(),
            )),
        ));

    let mut install_deps = format!("if [ -f {requirements} ]; then {pip} install -r {requirements}");
    if !config.python_packages.is_empty() {
        install_deps.push_str(&format!(
            "; else {pip} install {}",
            config.python_packages.join(" ")
        ));
    }
    install_deps.push_str("; fi");

    let python_runtime = Phase::new("Python runtime")
        .step(Step::python_env(
            "Create virtual environment",
            Directive::exec(["python3", "-m", "venv", venv.as_str()]),
        ))
        .step(Step::python_env(
            "Upgrade pip",
            Directive::exec([python.as_str(), "-m", "pip", "install", "--upgrade", "pip"]),
        ))
        .step(Step::python_env(
            "Install backend dependencies",
            Directive::shell(install_deps),
        ));

    let web = Phase::new("Web front end")
        .step(Step::generic(
            "Install web UI dependencies",
            Directive::shell(npm_in(&config.frontend_dir(), "install")),
        ))
        .step(Step::generic(
            "Build web UI",
            Directive::shell(npm_in(&config.frontend_dir(), "run build")),
        ));

    let service = Phase::new("Background service")
        .step(Step::generic(
            "Write service unit",
            Directive::WriteFile {
                path: config.unit_path(),
                contents: ServiceUnit::for_config(config).render(),
                mode: Some(0o644),
            },
        ))
        .step(Step::generic(
            "Set install ownership",
            Directive::exec([
                "chown".to_string(),
                "-R".to_string(),
                owner(config),
                install_dir.clone(),
            ]),
        ))
        .step(Step::generic(
            "Reload systemd",
            Directive::exec(["systemctl", "daemon-reload"]),
        ))
        .step(Step::generic(
            "Enable service",
            Directive::exec(["systemctl", "enable", config.service_name.as_str()]),
        ))
        .step(Step::generic(
            "Start service",
            Directive::exec(["systemctl", "restart", config.service_name.as_str()]),
        ));

    InstallationPlan::new(vec![packages, files, python_runtime, web, service])
}

/// Service liveness, venv integrity, install ownership and, when the
/// source tree ships a front end, the built web UI.
pub fn standard_checks(
    config: &ProvisionConfig,
    runner: Arc<dyn CommandRunner>,
    registry: &StrategyRegistry,
) -> Vec<DiagnosticCheck> {
    let service = config.service_name.as_str();
    let mut checks = Vec::new();

    checks.push(
        DiagnosticCheck::new(
            "service_running",
            Arc::new(CommandProbe::new(
                runner.clone(),
                Directive::exec(["systemctl", "is-active", "--quiet", service]),
            )),
        )
        .with_remedy(Arc::new(CommandRemedy::new(
            runner.clone(),
            vec![
                Directive::exec(["systemctl", "daemon-reload"]),
                Directive::exec(["systemctl", "restart", service]),
            ],
        ))),
    );

    let venv_check = DiagnosticCheck::new(
        "venv_integrity",
        Arc::new(PathProbe::new(vec![config.venv_python(), config.venv_pip()])),
    );
    checks.push(match registry.get(ENV_REBUILD) {
        Some(strategy) => venv_check.with_remedy(Arc::new(StrategyRemedy::new(strategy))),
        None => venv_check,
    });

    let dir = shell_quote(&config.install_dir);
    let user = shell_quote(Path::new(&config.service_user));
    checks.push(
        DiagnosticCheck::new(
            "install_ownership",
            Arc::new(CommandProbe::new(
                runner.clone(),
                Directive::shell(format!("[ \"$(stat -c %U {dir})\" = {user} ]")),
            )),
        )
        .with_remedy(Arc::new(CommandRemedy::new(
            runner,
            vec![Directive::exec([
                "chown".to_string(),
                "-R".to_string(),
                owner(config),
                config.install_dir.display().to_string(),
            ])],
        ))),
    );

    if config.source_frontend().exists() {
        checks.push(DiagnosticCheck::new(
            "web_ui_built",
            Arc::new(PathProbe::new(vec![config
                .frontend_dir()
                .join("dist")
                .join("index.html")])),
        ));
    }

    checks
}
