//! Provisioner configuration.
//!
//! Defaults describe a stock SnokNAS appliance. [`ProvisionConfig::from_env`]
//! overlays `SNOKNAS_*` environment variables; the installer binary layers
//! its command-line flags on top of that.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Package-database lock files released by `pkg-lock-clear`.
pub const DEFAULT_LOCK_FILES: &[&str] = &[
    "/var/lib/dpkg/lock-frontend",
    "/var/lib/dpkg/lock",
    "/var/cache/apt/archives/lock",
    "/var/lib/apt/lists/lock",
];

/// Everything the built-in plan, repairs and diagnostics need to know
/// about the target host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionConfig {
    /// Where the backend, front end and virtualenv are installed.
    pub install_dir: PathBuf,

    /// Checkout containing `backend/` (and optionally `frontend/`).
    pub source_dir: PathBuf,

    /// Python virtual environment directory.
    pub venv_dir: PathBuf,

    /// Distribution packages installed in the first phase.
    pub system_packages: Vec<String>,

    /// Python packages installed when the backend ships no requirements file.
    pub python_packages: Vec<String>,

    /// systemd unit name (without `.service`).
    pub service_name: String,

    /// Account the service runs as and that owns `install_dir`.
    pub service_user: String,

    /// Port the backend listens on.
    pub port: u16,

    /// Directory the unit file is written to.
    pub unit_dir: PathBuf,

    /// Append-only install log.
    pub log_file: PathBuf,

    /// Where report artifacts are written.
    pub report_dir: PathBuf,

    /// Lock files removed by the package-lock repair.
    pub lock_files: Vec<PathBuf>,

    /// Per-attempt timeout; `None` waits for the command indefinitely.
    pub step_timeout_secs: Option<u64>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let install_dir = PathBuf::from("/opt/snoknas");
        Self {
            venv_dir: install_dir.join("venv"),
            install_dir,
            source_dir: PathBuf::from("."),
            system_packages: [
                "python3",
                "python3-venv",
                "python3-pip",
                "smartmontools",
                "util-linux",
                "nodejs",
                "npm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            python_packages: vec!["flask".to_string(), "psutil".to_string()],
            service_name: "snoknas".to_string(),
            service_user: "root".to_string(),
            port: 8000,
            unit_dir: PathBuf::from("/etc/systemd/system"),
            log_file: PathBuf::from("/var/log/snoknas-install.log"),
            report_dir: PathBuf::from("/var/lib/snoknas/reports"),
            lock_files: DEFAULT_LOCK_FILES.iter().map(PathBuf::from).collect(),
            step_timeout_secs: None,
        }
    }
}

impl ProvisionConfig {
    /// Defaults overlaid with `SNOKNAS_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("SNOKNAS_INSTALL_DIR") {
            config = config.with_install_dir(dir);
        }
        if let Ok(dir) = std::env::var("SNOKNAS_SOURCE_DIR") {
            config.source_dir = PathBuf::from(dir);
        }
        if let Ok(user) = std::env::var("SNOKNAS_SERVICE_USER") {
            config.service_user = user;
        }
        if let Some(port) = std::env::var("SNOKNAS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }
        if let Ok(path) = std::env::var("SNOKNAS_LOG_FILE") {
            config.log_file = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("SNOKNAS_REPORT_DIR") {
            config.report_dir = PathBuf::from(dir);
        }
        config.step_timeout_secs = std::env::var("SNOKNAS_STEP_TIMEOUT")
            .ok()
            .and_then(|t| t.parse().ok())
            .or(config.step_timeout_secs);

        config
    }

    /// Move the install root; the virtualenv follows it.
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self.venv_dir = self.install_dir.join("venv");
        self
    }

    pub fn backend_dir(&self) -> PathBuf {
        self.install_dir.join("backend")
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.install_dir.join("frontend")
    }

    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir.join("bin").join("python")
    }

    pub fn venv_pip(&self) -> PathBuf {
        self.venv_dir.join("bin").join("pip")
    }

    /// `requirements.txt` shipped with the installed backend.
    pub fn requirements_file(&self) -> PathBuf {
        self.backend_dir().join("requirements.txt")
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.service_name))
    }

    /// Command line the service manager starts.
    pub fn exec_start(&self) -> String {
        format!(
            "{} {}",
            self.venv_python().display(),
            self.backend_dir().join("app.py").display()
        )
    }

    /// Source tree the install copies from.
    pub fn source_backend(&self) -> PathBuf {
        self.source_dir.join("backend")
    }

    pub fn source_frontend(&self) -> PathBuf {
        self.source_dir.join("frontend")
    }
}

/// Render a path for use inside a shell script.
pub(crate) fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = ProvisionConfig::default();
        assert_eq!(config.install_dir, PathBuf::from("/opt/snoknas"));
        assert_eq!(config.venv_dir, PathBuf::from("/opt/snoknas/venv"));
        assert_eq!(
            config.unit_path(),
            PathBuf::from("/etc/systemd/system/snoknas.service")
        );
        assert_eq!(config.lock_files.len(), 4);
        assert!(config.step_timeout_secs.is_none());
    }

    #[test]
    fn test_with_install_dir_moves_venv() {
        let config = ProvisionConfig::default().with_install_dir("/srv/nas");
        assert_eq!(config.venv_dir, PathBuf::from("/srv/nas/venv"));
        assert_eq!(config.venv_pip(), PathBuf::from("/srv/nas/venv/bin/pip"));
        assert_eq!(
            config.exec_start(),
            "/srv/nas/venv/bin/python /srv/nas/backend/app.py"
        );
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote(Path::new("/opt/snoknas")), "'/opt/snoknas'");
        assert_eq!(shell_quote(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = ProvisionConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: ProvisionConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }
}
