//! Append-only install log.
//!
//! One [`LogSink`] is built at startup and shared as `Arc<LogSink>` with the
//! runner, the repair strategies and the diagnostics. Each call to
//! [`LogSink::append`] writes one complete entry under a lock, so entries
//! from concurrent diagnostics never interleave.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::Result;

enum Backend {
    File(Mutex<File>),
    Memory(Mutex<Vec<String>>),
}

/// Process-wide append-only log.
pub struct LogSink {
    backend: Backend,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.backend {
            Backend::File(_) => "file",
            Backend::Memory(_) => "memory",
        };
        f.debug_struct("LogSink").field("backend", &kind).finish()
    }
}

impl LogSink {
    /// Open (or create) `path` for appending. Parent directories are created.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            backend: Backend::File(Mutex::new(file)),
        })
    }

    /// In-memory sink, used by dry runs and tests.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Append one timestamped entry. `body` may span several lines; the
    /// continuation lines are indented under the header.
    pub fn append(&self, source: &str, body: &str) {
        let entry = format_entry(source, body);
        match &self.backend {
            Backend::File(file) => {
                let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = file.write_all(entry.as_bytes()).and_then(|_| file.flush()) {
                    warn!(error = %e, "failed to append to install log");
                }
            }
            Backend::Memory(lines) => {
                lines
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(entry);
            }
        }
    }

    /// Entries recorded so far. Always empty for file-backed sinks.
    pub fn entries(&self) -> Vec<String> {
        match &self.backend {
            Backend::File(_) => Vec::new(),
            Backend::Memory(lines) => lines.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

fn format_entry(source: &str, body: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut lines = body.trim_end().lines();
    let mut entry = format!(
        "{} [{}] {}\n",
        timestamp,
        source,
        lines.next().unwrap_or_default()
    );
    for line in lines {
        entry.push_str("    ");
        entry.push_str(line);
        entry.push('\n');
    }
    entry
}
