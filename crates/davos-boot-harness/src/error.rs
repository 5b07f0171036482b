use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring up the emulator process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("emulator executable not found: {}", .program.display())]
    NotFound { program: PathBuf },

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Setting up the process plumbing (stderr capture file) failed before the spawn.
    #[error("failed to prepare emulator stdio: {0}")]
    Io(#[source] io::Error),
}

/// A write to the emulator's control channel failed, usually because the process already exited
/// and its stdin is closed.
///
/// Keys before `index` were delivered; nothing at or after `index` was written.
#[derive(Debug, Error)]
#[error("control channel closed while sending key #{index} `{key}`: {source}")]
pub struct PipeError {
    pub index: usize,
    pub key: String,
    #[source]
    pub source: io::Error,
}

impl PipeError {
    pub fn is_broken_pipe(&self) -> bool {
        self.source.kind() == io::ErrorKind::BrokenPipe
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key name is empty")]
    Empty,

    #[error("key name {0:?} contains whitespace or control characters")]
    InvalidCharacter(String),

    #[error("no QEMU key mapping for character {0:?}")]
    Unmapped(char),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} marker must not be empty")]
    EmptyMarker { field: &'static str },

    #[error("poll interval must be non-zero")]
    ZeroPollInterval,

    #[error("key sequence must contain at least one key")]
    EmptyKeySequence,

    #[error("emulator program path is empty")]
    EmptyProgram,
}
