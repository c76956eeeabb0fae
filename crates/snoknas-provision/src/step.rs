//! Provisioning step definitions.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Closed set of step categories. Used only to pick repair strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    /// apt/dpkg operations.
    PackageManager,

    /// Anything touching the Python virtual environment.
    PythonEnv,

    #[default]
    Generic,
}

impl StepCategory {
    pub fn name(&self) -> &'static str {
        match self {
            StepCategory::PackageManager => "package_manager",
            StepCategory::PythonEnv => "python_env",
            StepCategory::Generic => "generic",
        }
    }

    /// Derive a category from free-form command text.
    ///
    /// Only for turning untyped commands into steps; dispatch always reads
    /// the stored category.
    pub fn infer(command_text: &str) -> Self {
        static PKG: OnceLock<Regex> = OnceLock::new();
        static PY: OnceLock<Regex> = OnceLock::new();

        let pkg = PKG.get_or_init(|| {
            Regex::new(r"(^|[\s;&|(])(sudo\s+)?(apt|apt-get|aptitude|dpkg)(\s|$)")
                .expect("package-manager pattern is valid")
        });
        let py = PY.get_or_init(|| {
            Regex::new(r"(^|[\s/;&|(])(pip3?|virtualenv)(\s|$)|python3?\s+-m\s+(pip|venv)|/venv/")
                .expect("python-env pattern is valid")
        });

        if pkg.is_match(command_text) {
            StepCategory::PackageManager
        } else if py.is_match(command_text) {
            StepCategory::PythonEnv
        } else {
            StepCategory::Generic
        }
    }
}

/// What a step executes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    /// Program plus arguments (first element is the executable).
    Exec { argv: Vec<String> },

    /// Script run through `sh -c`.
    Shell { script: String },

    /// Write `contents` to `path`, creating parent directories.
    WriteFile {
        path: PathBuf,
        contents: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
    },
}

impl Directive {
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Directive::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        Directive::Shell {
            script: script.into(),
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Directive::WriteFile {
            path: path.into(),
            contents: contents.into(),
            mode: None,
        }
    }

    /// A directive with nothing to run cannot be invoked at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Directive::Exec { argv } => argv.first().map_or(true, |exe| exe.trim().is_empty()),
            Directive::Shell { script } => script.trim().is_empty(),
            Directive::WriteFile { path, .. } => path.as_os_str().is_empty(),
        }
    }

    /// One-line rendering for logs and reports.
    pub fn display(&self) -> String {
        match self {
            Directive::Exec { argv } => argv.join(" "),
            Directive::Shell { script } => script.clone(),
            Directive::WriteFile { path, contents, .. } => {
                format!("write {} ({} bytes)", path.display(), contents.len())
            }
        }
    }
}

/// One provisioning action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// Human-readable description shown in the report.
    pub description: String,

    pub command: Directive,

    pub category: StepCategory,
}

impl Step {
    pub fn new(description: impl Into<String>, command: Directive, category: StepCategory) -> Self {
        Self {
            description: description.into(),
            command,
            category,
        }
    }

    pub fn package(description: impl Into<String>, command: Directive) -> Self {
        Self::new(description, command, StepCategory::PackageManager)
    }

    pub fn python_env(description: impl Into<String>, command: Directive) -> Self {
        Self::new(description, command, StepCategory::PythonEnv)
    }

    pub fn generic(description: impl Into<String>, command: Directive) -> Self {
        Self::new(description, command, StepCategory::Generic)
    }

    /// Build a shell step from free-form text, inferring its category.
    pub fn from_shell_text(description: impl Into<String>, script: impl Into<String>) -> Self {
        let script = script.into();
        let category = StepCategory::infer(&script);
        Self::new(description, Directive::shell(script), category)
    }
}
