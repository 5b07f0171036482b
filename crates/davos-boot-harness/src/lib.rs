#![forbid(unsafe_code)]
//! Boot-verification harness for DavOS images.
//!
//! The harness launches QEMU with the guest's debug console (I/O port `0xE9`) redirected to a
//! file, waits for a boot marker to show up in that file, types a shell command through the QEMU
//! monitor (`sendkey`), and waits for the command's output marker. The verdict is binary: the
//! scenario either [`Verdict::Passed`] or failed with a [`FailureReason`] plus [`Diagnostics`].
//!
//! Every external effect sits behind a narrow capability so the state machine can be driven
//! without a real emulator:
//!
//! - [`Clock`]: the passage of time (polling sleeps, inter-key delays).
//! - [`Launcher`] / [`GuestProcess`]: spawning and talking to the emulator.
//!
//! ```no_run
//! use davos_boot_harness::{HarnessConfig, Orchestrator, QemuLauncher, SystemClock};
//!
//! let config = HarnessConfig::default();
//! let launcher = QemuLauncher::new(config.emulator.clone());
//! let outcome = Orchestrator::new(config, launcher, SystemClock).run();
//! std::process::exit(outcome.exit_code());
//! ```

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod keys;
pub mod launcher;
pub mod log_watch;
pub mod orchestrator;
pub mod report;
pub mod scenario;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EmulatorConfig, HarnessConfig};
pub use diagnostics::{Diagnostics, LogSnapshot};
pub use error::{ConfigError, KeyError, LaunchError, PipeError};
pub use keys::{keys_for_command, send_keys, KeyName};
pub use launcher::{ExitState, GuestProcess, LaunchRequest, Launcher, QemuLauncher, QemuProcess};
pub use log_watch::LogWatcher;
pub use orchestrator::{FailureReason, Orchestrator, Outcome, RunState, Verdict};
pub use report::RunReport;
pub use scenario::{MarkerWait, Milestone, Scenario, ScenarioStep};
