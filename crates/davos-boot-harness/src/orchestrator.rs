//! The boot scenario state machine.
//!
//! ```text
//! Starting -> WaitingBoot -> SendingKeys -> WaitingResult -> Passed
//!     |            |                             |
//!     +------------+-----------> Failed <--------+
//! ```
//!
//! The orchestrator owns the emulator process for the whole run and terminates it exactly once,
//! whichever state the run ends in.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::HarnessConfig;
use crate::diagnostics::Diagnostics;
use crate::keys::send_keys;
use crate::launcher::{GuestProcess, LaunchRequest, Launcher};
use crate::log_watch::LogWatcher;
use crate::scenario::{MarkerWait, Milestone, Scenario, ScenarioStep};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    WaitingBoot,
    SendingKeys,
    WaitingResult,
    Passed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    LaunchFailure { error: String },
    BootTimeout { marker: String, timeout: Duration },
    CommandTimeout { marker: String, timeout: Duration },
}

impl FailureReason {
    /// Stable short name, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LaunchFailure { .. } => "launch failure",
            Self::BootTimeout { .. } => "boot timeout",
            Self::CommandTimeout { .. } => "command timeout",
        }
    }

    fn timed_out(wait: &MarkerWait) -> Self {
        let marker = wait.marker.clone();
        let timeout = wait.timeout;
        match wait.milestone {
            Milestone::Boot => Self::BootTimeout { marker, timeout },
            Milestone::CommandOutput => Self::CommandTimeout { marker, timeout },
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaunchFailure { error } => write!(f, "{}: {error}", self.kind()),
            Self::BootTimeout { marker, timeout } | Self::CommandTimeout { marker, timeout } => {
                write!(f, "{}: {marker:?} not seen within {timeout:?}", self.kind())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(FailureReason),
}

/// Result of one scenario run.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Every state entered, in order, ending in `Passed` or `Failed`.
    pub transitions: Vec<RunState>,
    /// Set when typing was cut short; the run still went on to wait for the result.
    pub key_error: Option<String>,
    pub diagnostics: Option<Diagnostics>,
    pub command_line: Vec<String>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    /// Process exit status for the whole run: 0 on pass, 1 on any failure.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.verdict {
            Verdict::Passed => None,
            Verdict::Failed(reason) => Some(reason),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            Verdict::Passed => write!(
                f,
                "Test passed: guest booted and answered the command ({:.1}s).",
                self.elapsed.as_secs_f64()
            ),
            Verdict::Failed(reason) => {
                write!(f, "ERROR: {reason}")?;
                if let Some(key_error) = &self.key_error {
                    write!(f, "\n(key injection was cut short: {key_error})")?;
                }
                Ok(())
            }
        }
    }
}

pub struct Orchestrator<L, C> {
    config: HarnessConfig,
    scenario: Scenario,
    watcher: LogWatcher,
    launcher: L,
    clock: C,
}

impl<L: Launcher, C: Clock> Orchestrator<L, C> {
    pub fn new(config: HarnessConfig, launcher: L, clock: C) -> Self {
        let scenario = Scenario::from_config(&config);
        let watcher = LogWatcher::new(config.poll_interval);
        Self {
            config,
            scenario,
            watcher,
            launcher,
            clock,
        }
    }

    pub fn run(&self) -> Outcome {
        let started = self.clock.now();
        let mut run = Transitions::default();
        run.enter(RunState::Starting);

        let request = LaunchRequest {
            image_path: self.config.image_path.clone(),
            log_path: self.config.log_path.clone(),
        };
        let command_line = self.launcher.command_line(&request);

        let launched = remove_stale_log(&self.config.log_path)
            .map_err(|err| {
                format!(
                    "could not remove stale log {}: {err}",
                    self.config.log_path.display()
                )
            })
            .and_then(|()| {
                self.launcher
                    .launch(&request)
                    .map_err(|err| err.to_string())
            });

        let mut process = match launched {
            Ok(process) => process,
            Err(error) => {
                tracing::error!("launch failed: {error}");
                run.enter(RunState::Failed);
                return Outcome {
                    verdict: Verdict::Failed(FailureReason::LaunchFailure { error }),
                    transitions: run.into_inner(),
                    key_error: None,
                    diagnostics: Some(Diagnostics::without_process(&self.config.log_path)),
                    command_line,
                    elapsed: self.clock.now().duration_since(started),
                };
            }
        };

        let mut key_error = None;
        let result = self.drive(&mut process, &mut run, &mut key_error);

        // Capture before terminating so the exit status reflects a crash, not our own kill.
        let diagnostics = result.is_err().then(|| {
            Diagnostics::capture(
                &mut process,
                &self.config.log_path,
                self.config.stderr_tail_lines,
            )
        });

        if let Err(err) = process.terminate() {
            tracing::warn!("failed to terminate emulator: {err}");
        }

        let verdict = match result {
            Ok(()) => {
                run.enter(RunState::Passed);
                Verdict::Passed
            }
            Err(reason) => {
                tracing::error!("scenario failed: {reason}");
                run.enter(RunState::Failed);
                Verdict::Failed(reason)
            }
        };

        Outcome {
            verdict,
            transitions: run.into_inner(),
            key_error,
            diagnostics,
            command_line,
            elapsed: self.clock.now().duration_since(started),
        }
    }

    fn drive<P: GuestProcess + ?Sized>(
        &self,
        process: &mut P,
        run: &mut Transitions,
        key_error: &mut Option<String>,
    ) -> Result<(), FailureReason> {
        for step in self.scenario.steps() {
            match step {
                ScenarioStep::WaitForMarker(wait) => {
                    run.enter(match wait.milestone {
                        Milestone::Boot => RunState::WaitingBoot,
                        Milestone::CommandOutput => RunState::WaitingResult,
                    });
                    let found = self.watcher.wait_for(
                        &wait.marker,
                        &self.config.log_path,
                        wait.timeout,
                        &self.clock,
                    );
                    if !found {
                        return Err(FailureReason::timed_out(wait));
                    }
                }
                ScenarioStep::SendKeys(keys) => {
                    run.enter(RunState::SendingKeys);
                    if let Err(err) =
                        send_keys(process, keys, self.config.key_delay, &self.clock)
                    {
                        // The guest may still have printed something; let the result wait
                        // decide.
                        tracing::warn!("{err}; waiting for the result anyway");
                        *key_error = Some(err.to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

fn remove_stale_log(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed stale log");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[derive(Default)]
struct Transitions(Vec<RunState>);

impl Transitions {
    fn enter(&mut self, state: RunState) {
        tracing::info!(?state, "scenario state");
        self.0.push(state);
    }

    fn into_inner(self) -> Vec<RunState> {
        self.0
    }
}
