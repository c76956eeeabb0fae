//! In-memory fakes for the runner and diagnostics (testing only).
//!
//! `ScriptedRunner` satisfies [`CommandRunner`] without touching the host;
//! `ToggleProbe` and `CountingRemedy` model a resource that a remedy fixes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::diagnostics::{Probe, Remedy};
use crate::error::ProvisionError;
use crate::runner::{CommandOutput, CommandRunner};
use crate::sink::LogSink;
use crate::step::Directive;
use crate::Result;

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Behavior {
    FailTimes { remaining: usize, log: String },
    AlwaysFail { log: String },
    SpawnError,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    behavior: Behavior,
}

/// Runner whose outcomes are scripted by substring of the rendered directive.
///
/// Directives matching no active rule succeed. Rules are checked in the
/// order they were added; an exhausted `fail_times` rule stops matching.
#[derive(Debug)]
pub struct ScriptedRunner {
    sink: Arc<LogSink>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(LogSink::memory()))
    }

    pub fn with_sink(sink: Arc<LogSink>) -> Self {
        Self {
            sink,
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn rule(self, pattern: &str, behavior: Behavior) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            behavior,
        });
        self
    }

    /// Fail the next `times` matching invocations, then succeed.
    pub fn fail_times(self, pattern: &str, times: usize) -> Self {
        self.fail_times_with(pattern, times, "simulated failure")
    }

    /// Like [`fail_times`](Self::fail_times) with a custom failure log.
    pub fn fail_times_with(self, pattern: &str, times: usize, log: &str) -> Self {
        self.rule(
            pattern,
            Behavior::FailTimes {
                remaining: times,
                log: log.to_string(),
            },
        )
    }

    pub fn always_fail(self, pattern: &str) -> Self {
        self.rule(
            pattern,
            Behavior::AlwaysFail {
                log: "simulated failure".to_string(),
            },
        )
    }

    /// Matching invocations cannot be spawned at all.
    pub fn spawn_error(self, pattern: &str) -> Self {
        self.rule(pattern, Behavior::SpawnError)
    }

    /// Rendered directives in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations whose rendering contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, directive: &Directive) -> Result<CommandOutput> {
        if directive.is_empty() {
            return Err(ProvisionError::EmptyCommand {
                step: directive.display(),
            });
        }

        let rendered = directive.display();
        self.calls.lock().unwrap().push(rendered.clone());

        let mut outcome = Ok(CommandOutput::success(format!("ok: {}", rendered)));
        {
            let mut rules = self.rules.lock().unwrap();
            for rule in rules.iter_mut() {
                if !rendered.contains(&rule.pattern) {
                    continue;
                }
                match &mut rule.behavior {
                    Behavior::FailTimes { remaining, log } if *remaining > 0 => {
                        *remaining -= 1;
                        outcome = Ok(CommandOutput::failure(Some(1), log.clone()));
                        break;
                    }
                    Behavior::FailTimes { .. } => continue,
                    Behavior::AlwaysFail { log } => {
                        outcome = Ok(CommandOutput::failure(Some(1), log.clone()));
                        break;
                    }
                    Behavior::SpawnError => {
                        outcome = Err(ProvisionError::Spawn {
                            program: rendered.clone(),
                            source: std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                "scripted spawn error",
                            ),
                        });
                        break;
                    }
                }
            }
        }

        match &outcome {
            Ok(output) => self.sink.append("runner", &format!("$ {}\n{}", rendered, output.log)),
            Err(e) => self.sink.append("runner", &format!("$ {} -> error: {}", rendered, e)),
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Diagnostics fakes
// ---------------------------------------------------------------------------

/// Probe reading a shared flag that [`CountingRemedy`] can flip.
#[derive(Debug, Clone)]
pub struct ToggleProbe {
    state: Arc<AtomicBool>,
    probes: Arc<AtomicUsize>,
}

impl ToggleProbe {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Arc::new(AtomicBool::new(initial)),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// A remedy that sets this probe's flag to `fixes_to`.
    pub fn remedy(&self, fixes_to: bool) -> CountingRemedy {
        CountingRemedy {
            state: self.state.clone(),
            fixes_to,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Probe for ToggleProbe {
    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.state.load(Ordering::SeqCst)
    }
}

/// Remedy that records how often it ran.
#[derive(Debug, Clone)]
pub struct CountingRemedy {
    state: Arc<AtomicBool>,
    fixes_to: bool,
    calls: Arc<AtomicUsize>,
}

impl CountingRemedy {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remedy for CountingRemedy {
    async fn remedy(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state.store(self.fixes_to, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_times_then_succeeds() {
        let runner = ScriptedRunner::new().fail_times("apt-get", 1);
        let cmd = Directive::exec(["apt-get", "update"]);

        assert!(!runner.run(&cmd).await.unwrap().succeeded);
        assert!(runner.run(&cmd).await.unwrap().succeeded);
        assert_eq!(runner.count("apt-get"), 2);
    }

    #[tokio::test]
    async fn test_unmatched_commands_succeed() {
        let runner = ScriptedRunner::new().always_fail("pip");
        assert!(runner.run(&Directive::exec(["true"])).await.unwrap().succeeded);
    }

    #[tokio::test]
    async fn test_spawn_error_rule() {
        let runner = ScriptedRunner::new().spawn_error("missing-tool");
        let err = runner
            .run(&Directive::exec(["missing-tool"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Spawn { .. }));
    }
}
