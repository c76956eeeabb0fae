//! Directive execution.
//!
//! A non-zero exit is a normal [`CommandOutput`] with `succeeded == false`.
//! `Err` is reserved for directives that could not be invoked at all
//! (empty, unspawnable, timed out).

use crate::error::ProvisionError;
use crate::sink::LogSink;
use crate::step::Directive;
use crate::Result;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one directive invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub succeeded: bool,

    /// Exit code, when the directive was a process that exited normally.
    pub exit_code: Option<i32>,

    /// Combined stdout and stderr (or a status line for file writes).
    pub log: String,

    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            exit_code: Some(0),
            log: log.into(),
            duration_ms: 0,
        }
    }

    pub fn failure(exit_code: Option<i32>, log: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            exit_code,
            log: log.into(),
            duration_ms: 0,
        }
    }
}

/// Executes directives. Implementations append every invocation to the
/// install log, whatever its outcome.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, directive: &Directive) -> Result<CommandOutput>;
}

/// Runs directives on the host with the current privileges.
pub struct ShellRunner {
    sink: Arc<LogSink>,
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self {
            sink,
            timeout: None,
        }
    }

    /// Fail an attempt that runs longer than `secs`. `0` disables the limit.
    ///
    /// With a limit set, each directive runs in its own process group on
    /// Unix and the whole group is killed on timeout, so a stuck `apt-get`
    /// under `sh -c` does not keep holding the dpkg lock. Elsewhere only the
    /// direct child is killed.
    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.timeout = secs.filter(|s| *s > 0).map(Duration::from_secs);
        self
    }

    async fn spawn(&self, exe: &str, args: &[String]) -> Result<CommandOutput> {
        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        if self.timeout.is_some() {
            command.process_group(0);
        }

        let child = command.spawn().map_err(|source| ProvisionError::Spawn {
            program: exe.to_string(),
            source,
        })?;
        let pid = child.id();

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    if let Some(pgid) = pid {
                        kill_process_group(pgid);
                    }
                    return Err(ProvisionError::Timeout {
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let mut log = String::from_utf8_lossy(&output.stdout).to_string();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            succeeded: output.status.success(),
            exit_code: output.status.code(),
            log,
            duration_ms: 0,
        })
    }

    async fn write_file(
        &self,
        path: &std::path::Path,
        contents: &str,
        mode: Option<u32>,
    ) -> CommandOutput {
        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, contents).await?;
            if let Some(mode) = mode {
                set_mode(path, mode).await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => CommandOutput::success(format!(
                "wrote {} bytes to {}",
                contents.len(),
                path.display()
            )),
            Err(e) => CommandOutput::failure(None, format!("write {}: {}", path.display(), e)),
        }
    }
}

/// SIGKILL every process left in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "killed timed-out process group"),
        // group already empty
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "could not signal timed-out process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, directive: &Directive) -> Result<CommandOutput> {
        if directive.is_empty() {
            return Err(ProvisionError::EmptyCommand {
                step: directive.display(),
            });
        }

        let start = Instant::now();
        debug!(command = %directive.display(), "running directive");

        let result = match directive {
            Directive::Exec { argv } => self.spawn(&argv[0], &argv[1..]).await,
            Directive::Shell { script } => {
                self.spawn("sh", &["-c".to_string(), script.clone()]).await
            }
            Directive::WriteFile {
                path,
                contents,
                mode,
            } => Ok(self.write_file(path, contents, *mode).await),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(mut output) => {
                output.duration_ms = duration_ms;
                self.sink.append(
                    "runner",
                    &format!(
                        "$ {} -> {} ({}ms)\n{}",
                        directive.display(),
                        status_label(&output),
                        duration_ms,
                        output.log
                    ),
                );
                Ok(output)
            }
            Err(e) => {
                self.sink.append(
                    "runner",
                    &format!("$ {} -> error: {}", directive.display(), e),
                );
                Err(e)
            }
        }
    }
}

/// Records directives without executing them.
pub struct DryRunRunner {
    sink: Arc<LogSink>,
}

impl DryRunRunner {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, directive: &Directive) -> Result<CommandOutput> {
        if directive.is_empty() {
            return Err(ProvisionError::EmptyCommand {
                step: directive.display(),
            });
        }
        self.sink
            .append("dry-run", &format!("$ {}", directive.display()));
        Ok(CommandOutput::success("dry run: not executed"))
    }
}

#[cfg(unix)]
async fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn status_label(output: &CommandOutput) -> String {
    match (output.succeeded, output.exit_code) {
        (true, _) => "ok".to_string(),
        (false, Some(code)) => format!("exit {}", code),
        (false, None) => "failed".to_string(),
    }
}
