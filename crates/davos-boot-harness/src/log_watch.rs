//! Polling the debug console log for markers.
//!
//! QEMU creates the log file some time after it starts and appends to it while the guest runs.
//! The watcher re-reads the whole file on every tick: the file is small and this keeps the
//! watcher stateless across the gap between "deleted" and "created again".

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug)]
pub struct LogWatcher {
    poll_interval: Duration,
}

impl LogWatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Wait until the file at `log_path` contains `marker`.
    ///
    /// Returns `true` on the first tick that sees the marker and `false` once `timeout` has
    /// elapsed without one. A missing or unreadable file counts as "not yet"; nothing here is
    /// fatal.
    pub fn wait_for<C: Clock + ?Sized>(
        &self,
        marker: &str,
        log_path: &Path,
        timeout: Duration,
        clock: &C,
    ) -> bool {
        let start = clock.now();
        while clock.now().duration_since(start) < timeout {
            match read_log(log_path) {
                Ok(Some(content)) if content.contains(marker) => {
                    tracing::debug!(
                        marker,
                        elapsed = ?clock.now().duration_since(start),
                        "marker found"
                    );
                    return true;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::trace!(path = %log_path.display(), "log not created yet");
                }
                Err(err) => {
                    // Typically a read racing QEMU's writes; try again next tick.
                    tracing::debug!(path = %log_path.display(), "log read failed: {err}");
                }
            }
            clock.sleep(self.poll_interval);
        }
        tracing::debug!(marker, ?timeout, "marker not found before timeout");
        false
    }
}

/// Current log content, or `None` if the file does not exist.
///
/// Invalid UTF-8 is dropped rather than replaced, so a marker split by a stray byte from the
/// guest still matches.
pub fn read_log(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(decode_ignoring_invalid(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn decode_ignoring_invalid(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}
