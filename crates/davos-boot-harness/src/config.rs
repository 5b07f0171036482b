use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::keys::KeyName;

/// Default emulator binary. DavOS is a 32-bit x86 kernel.
pub const DEFAULT_QEMU: &str = "qemu-system-i386";

/// How to start the emulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub program: PathBuf,
    /// Appended after the fixed argument set.
    pub extra_args: Vec<String>,
    /// How long `terminate` waits after the monitor `quit` before force-killing.
    pub terminate_grace: Duration,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_QEMU),
            extra_args: Vec::new(),
            terminate_grace: Duration::from_secs(3),
        }
    }
}

/// Everything one run of the boot scenario needs.
///
/// [`HarnessConfig::default`] is the reference CI invocation: boot `build/dav-go-os.iso`, wait
/// up to 10s for `DavOS`, type `help`, wait up to 5s for `Commands:`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    pub image_path: PathBuf,
    /// Debug console output file. Deleted at run start, left behind afterwards.
    pub log_path: PathBuf,
    pub emulator: EmulatorConfig,

    pub boot_marker: String,
    pub boot_timeout: Duration,
    pub key_sequence: Vec<KeyName>,
    pub result_marker: String,
    pub result_timeout: Duration,

    pub poll_interval: Duration,
    pub key_delay: Duration,
    /// Number of trailing stderr lines kept in diagnostics.
    pub stderr_tail_lines: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("build/dav-go-os.iso"),
            log_path: PathBuf::from("qemu.log"),
            emulator: EmulatorConfig::default(),
            boot_marker: "DavOS".to_string(),
            boot_timeout: Duration::from_secs(10),
            key_sequence: ["h", "e", "l", "p"]
                .into_iter()
                .map(KeyName::literal)
                .chain(std::iter::once(KeyName::enter()))
                .collect(),
            result_marker: "Commands:".to_string(),
            result_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            key_delay: Duration::from_millis(100),
            stderr_tail_lines: 40,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.emulator.program.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.boot_marker.is_empty() {
            return Err(ConfigError::EmptyMarker { field: "boot" });
        }
        if self.result_marker.is_empty() {
            return Err(ConfigError::EmptyMarker { field: "result" });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.key_sequence.is_empty() {
            return Err(ConfigError::EmptyKeySequence);
        }
        Ok(())
    }
}
