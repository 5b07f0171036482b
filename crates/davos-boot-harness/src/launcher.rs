//! Spawning and controlling the emulator process.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::EmulatorConfig;
use crate::error::LaunchError;

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExitState {
    pub code: Option<i32>,
    /// Terminating signal, unix only.
    pub signal: Option<i32>,
}

impl ExitState {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// The narrow surface the scenario needs from a running emulator.
pub trait GuestProcess {
    /// Write `bytes` to the control channel and flush.
    fn write_input(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Everything the process wrote to stderr so far. Never blocks.
    fn read_error_nonblocking(&mut self) -> io::Result<Vec<u8>>;

    /// `Some` once the process has exited.
    fn poll_exit(&mut self) -> io::Result<Option<ExitState>>;

    /// Stop the process. A no-op if it already exited; safe to call repeatedly.
    fn terminate(&mut self) -> io::Result<()>;
}

/// What to boot and where the guest's debug console goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image_path: PathBuf,
    pub log_path: PathBuf,
}

pub trait Launcher {
    type Process: GuestProcess;

    fn launch(&self, request: &LaunchRequest) -> Result<Self::Process, LaunchError>;

    /// Human-readable command line for reports.
    fn command_line(&self, _request: &LaunchRequest) -> Vec<String> {
        Vec::new()
    }
}

/// Launches QEMU headless with the debug console in a file and the monitor on stdio.
#[derive(Clone, Debug)]
pub struct QemuLauncher {
    config: EmulatorConfig,
}

impl QemuLauncher {
    pub fn new(config: EmulatorConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, request: &LaunchRequest) -> Vec<OsString> {
        let mut debugcon = OsString::from("file:");
        debugcon.push(request.log_path.as_os_str());

        let mut args: Vec<OsString> = vec![
            "-cdrom".into(),
            request.image_path.clone().into_os_string(),
            // Port 0xE9 output from the guest lands in the log file.
            "-debugcon".into(),
            debugcon,
            "-serial".into(),
            "none".into(),
            "-monitor".into(),
            "stdio".into(),
            "-display".into(),
            "none".into(),
        ];
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args
    }

    fn spawn_with_retry(&self, cmd: &mut Command) -> io::Result<Child> {
        let mut attempts = 0u32;
        loop {
            match cmd.spawn() {
                Ok(child) => return Ok(child),
                Err(err) => {
                    // A freshly written emulator wrapper script can still be open for writing in
                    // another thread's forked child, which surfaces as ETXTBSY.
                    #[cfg(unix)]
                    let should_retry = err.raw_os_error() == Some(26);
                    #[cfg(not(unix))]
                    let should_retry = false;

                    if should_retry && attempts < 3 {
                        attempts += 1;
                        std::thread::sleep(Duration::from_millis(10 * attempts as u64));
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Launcher for QemuLauncher {
    type Process = QemuProcess;

    fn launch(&self, request: &LaunchRequest) -> Result<QemuProcess, LaunchError> {
        let program = &self.config.program;

        // Stderr is a file, never a pipe: nothing drains it while the scenario runs.
        let stderr_capture = tempfile::Builder::new()
            .prefix("davos-qemu-stderr-")
            .tempfile()
            .map_err(LaunchError::Io)?;
        let child_stderr = stderr_capture.reopen().map_err(LaunchError::Io)?;

        let mut cmd = Command::new(program);
        cmd.args(self.args(request))
            .stdin(Stdio::piped())
            // The monitor echoes every command; the verdict only depends on the log file.
            .stdout(Stdio::null())
            .stderr(Stdio::from(child_stderr));

        let mut child = self.spawn_with_retry(&mut cmd).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound {
                    program: program.clone(),
                }
            } else {
                LaunchError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;
        tracing::info!(pid = child.id(), program = %program.display(), "emulator started");

        let stdin = child.stdin.take();
        Ok(QemuProcess {
            child,
            stdin,
            stderr_capture,
            exit: None,
            terminate_grace: self.config.terminate_grace,
        })
    }

    fn command_line(&self, request: &LaunchRequest) -> Vec<String> {
        let args = self.args(request);
        std::iter::once(self.config.program.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }
}

/// A running QEMU instance.
pub struct QemuProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_capture: NamedTempFile,
    exit: Option<ExitState>,
    terminate_grace: Duration,
}

impl QemuProcess {
    fn wait_for_exit(&mut self, timeout: Duration) -> io::Result<Option<ExitState>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.poll_exit()? {
                return Ok(Some(exit));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl GuestProcess for QemuProcess {
    fn write_input(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "emulator stdin is closed"))?;
        stdin.write_all(bytes)?;
        stdin.flush()
    }

    fn read_error_nonblocking(&mut self) -> io::Result<Vec<u8>> {
        // A fresh handle has its own offset, so the child's writes are never disturbed.
        let mut file = self.stderr_capture.reopen()?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn poll_exit(&mut self) -> io::Result<Option<ExitState>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?.map(ExitState::from);
        }
        Ok(self.exit)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.poll_exit()?.is_some() {
            return Ok(());
        }

        // Ask the monitor to quit first so QEMU can shut down cleanly, then close stdin.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"quit\n").and_then(|()| stdin.flush());
        }
        if let Some(exit) = self.wait_for_exit(self.terminate_grace)? {
            tracing::debug!(%exit, "emulator exited after quit");
            return Ok(());
        }

        tracing::warn!(
            grace = ?self.terminate_grace,
            "emulator ignored quit; killing pid {}",
            self.child.id()
        );
        self.child.kill()?;
        let status = self.child.wait()?;
        self.exit = Some(ExitState::from(status));
        Ok(())
    }
}

impl Drop for QemuProcess {
    fn drop(&mut self) {
        // Backstop for panics; the orchestrator terminates explicitly.
        if self.exit.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
