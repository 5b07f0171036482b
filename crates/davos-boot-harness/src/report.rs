//! Machine-readable run report, written next to CI artifacts.

use std::io;
use std::path::Path;

use serde::Serialize;

use crate::diagnostics::Diagnostics;
use crate::orchestrator::{Outcome, RunState, Verdict};

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub passed: bool,
    pub exit_code: i32,
    pub failure_kind: Option<&'static str>,
    pub failure: Option<String>,
    pub key_error: Option<&'a str>,
    pub transitions: &'a [RunState],
    pub elapsed_ms: u64,
    pub emulator_cmdline: &'a [String],
    pub emulator_cmdline_string: String,
    pub diagnostics: Option<&'a Diagnostics>,
}

impl<'a> RunReport<'a> {
    pub fn new(outcome: &'a Outcome) -> Self {
        let failure = match &outcome.verdict {
            Verdict::Passed => None,
            Verdict::Failed(reason) => Some(reason),
        };
        Self {
            kind: "davos_boot_check",
            passed: outcome.passed(),
            exit_code: outcome.exit_code(),
            failure_kind: failure.map(|r| r.kind()),
            failure: failure.map(ToString::to_string),
            key_error: outcome.key_error.as_deref(),
            transitions: &outcome.transitions,
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            emulator_cmdline: &outcome.command_line,
            emulator_cmdline_string: outcome.command_line.join(" "),
            diagnostics: outcome.diagnostics.as_ref(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let bytes = self.to_json_pretty().map_err(io::Error::other)?;
        std::fs::write(path, bytes)
    }
}
