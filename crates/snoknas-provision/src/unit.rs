//! systemd unit for the SnokNAS backend.

use crate::config::ProvisionConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

/// Service descriptor written by the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub working_directory: PathBuf,
    pub exec_start: String,
    pub user: String,
    /// Restart policy; the installer always uses `always`.
    pub restart: String,
    pub restart_sec: u32,
    pub environment: Vec<(String, String)>,
    pub after: String,
    /// Target the service is enabled under.
    pub wanted_by: String,
}

impl ServiceUnit {
    pub fn for_config(config: &ProvisionConfig) -> Self {
        Self {
            description: "SnokNAS storage dashboard".to_string(),
            working_directory: config.backend_dir(),
            exec_start: config.exec_start(),
            user: config.service_user.clone(),
            restart: "always".to_string(),
            restart_sec: 5,
            environment: vec![
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("SNOKNAS_PORT".to_string(), config.port.to_string()),
            ],
            after: "network.target".to_string(),
            wanted_by: "multi-user.target".to_string(),
        }
    }

    /// Render the unit file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description={}", self.description);
        let _ = writeln!(out, "After={}", self.after);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "Type=simple");
        let _ = writeln!(out, "User={}", self.user);
        let _ = writeln!(out, "WorkingDirectory={}", self.working_directory.display());
        for (key, value) in &self.environment {
            let _ = writeln!(out, "Environment={}={}", key, value);
        }
        let _ = writeln!(out, "ExecStart={}", self.exec_start);
        let _ = writeln!(out, "Restart={}", self.restart);
        let _ = writeln!(out, "RestartSec={}", self.restart_sec);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy={}", self.wanted_by);
        out
    }
}
