//! Post-mortem context captured when a run fails.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::launcher::{ExitState, GuestProcess};
use crate::log_watch::read_log;

/// State of the debug console log at capture time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "content", rename_all = "snake_case")]
pub enum LogSnapshot {
    Contents(String),
    Missing,
    Unreadable(String),
}

impl LogSnapshot {
    pub fn capture(path: &Path) -> Self {
        match read_log(path) {
            Ok(Some(content)) => Self::Contents(content),
            Ok(None) => Self::Missing,
            Err(err) => Self::Unreadable(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// `None` if the emulator was still running (or never started).
    pub exit: Option<ExitState>,
    pub stderr_tail: String,
    /// Lines dropped from the front of stderr to produce `stderr_tail`.
    pub stderr_truncated_lines: usize,
    pub log_path: PathBuf,
    pub log: LogSnapshot,
}

impl Diagnostics {
    /// Everything we know about a run that never got a process.
    pub fn without_process(log_path: &Path) -> Self {
        Self {
            exit: None,
            stderr_tail: String::new(),
            stderr_truncated_lines: 0,
            log_path: log_path.to_path_buf(),
            log: LogSnapshot::capture(log_path),
        }
    }

    /// Snapshot exit state, stderr and the log. Capture failures are folded into the result
    /// instead of being returned; this runs on the failure path and must not fail itself.
    pub fn capture<P: GuestProcess + ?Sized>(
        process: &mut P,
        log_path: &Path,
        tail_lines: usize,
    ) -> Self {
        let exit = process.poll_exit().unwrap_or_else(|err| {
            tracing::warn!("failed to poll emulator exit status: {err}");
            None
        });
        let stderr = match process.read_error_nonblocking() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => format!("<failed to read emulator stderr: {err}>"),
        };
        let (stderr_tail, stderr_truncated_lines) = tail(&stderr, tail_lines);

        Self {
            exit,
            stderr_tail,
            stderr_truncated_lines,
            log_path: log_path.to_path_buf(),
            log: LogSnapshot::capture(log_path),
        }
    }
}

/// Last `max_lines` lines of `text`, plus how many were dropped.
fn tail(text: &str, max_lines: usize) -> (String, usize) {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(max_lines);
    (lines[skip..].join("\n"), skip)
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit {
            Some(exit) => writeln!(f, "emulator exited early: {exit}")?,
            None => writeln!(f, "emulator was still running")?,
        }

        if self.stderr_truncated_lines > 0 {
            writeln!(
                f,
                "--- emulator stderr (last lines, {} earlier omitted) ---",
                self.stderr_truncated_lines
            )?;
        } else {
            writeln!(f, "--- emulator stderr ---")?;
        }
        if self.stderr_tail.is_empty() {
            writeln!(f, "<empty>")?;
        } else {
            writeln!(f, "{}", self.stderr_tail)?;
        }
        writeln!(f, "-----------------------")?;

        writeln!(f, "--- {} ---", self.log_path.display())?;
        match &self.log {
            LogSnapshot::Contents(content) => writeln!(f, "{content}")?,
            LogSnapshot::Missing => writeln!(f, "{} not found.", self.log_path.display())?,
            LogSnapshot::Unreadable(err) => {
                writeln!(f, "{} could not be read: {err}", self.log_path.display())?
            }
        }
        write!(f, "-----------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct Crashed {
        stderr: &'static [u8],
    }

    impl GuestProcess for Crashed {
        fn write_input(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn read_error_nonblocking(&mut self) -> io::Result<Vec<u8>> {
            Ok(self.stderr.to_vec())
        }

        fn poll_exit(&mut self) -> io::Result<Option<ExitState>> {
            Ok(Some(ExitState::from_code(1)))
        }

        fn terminate(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn captures_exit_stderr_tail_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("qemu.log");
        std::fs::write(&log, "SeaBIOS\n").unwrap();

        let mut process = Crashed {
            stderr: b"line1\nline2\nqemu: could not load kernel\n",
        };
        let diag = Diagnostics::capture(&mut process, &log, 2);

        assert_eq!(diag.exit, Some(ExitState::from_code(1)));
        assert_eq!(diag.stderr_tail, "line2\nqemu: could not load kernel");
        assert_eq!(diag.stderr_truncated_lines, 1);
        assert_eq!(diag.log, LogSnapshot::Contents("SeaBIOS\n".to_string()));

        let rendered = diag.to_string();
        assert!(rendered.contains("emulator exited early: exit code 1"));
        assert!(rendered.contains("1 earlier omitted"));
        assert!(rendered.contains("SeaBIOS"));
    }

    #[test]
    fn missing_log_is_reported_explicitly() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("qemu.log");

        let diag = Diagnostics::without_process(&log);
        assert_eq!(diag.log, LogSnapshot::Missing);
        assert!(diag.to_string().contains("qemu.log not found."));
        assert!(diag.to_string().contains("<empty>"));
    }

    #[test]
    fn tail_keeps_everything_when_short() {
        assert_eq!(tail("a\nb", 40), ("a\nb".to_string(), 0));
        assert_eq!(tail("", 40), (String::new(), 0));
        assert_eq!(tail("a\nb\nc", 0), (String::new(), 3));
    }
}
