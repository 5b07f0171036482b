//! Synthetic keyboard input through the QEMU monitor.
//!
//! The monitor is attached to the emulator's stdin (`-monitor stdio`), so each key becomes one
//! `sendkey <name>` line. Key names are QEMU qcodes (`a`, `shift-a`, `spc`, `ret`, ...).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::{KeyError, PipeError};
use crate::launcher::GuestProcess;

/// Monitor command used to inject one key press.
pub const SENDKEY_COMMAND: &str = "sendkey";

const ENTER: &str = "ret";

/// A single QEMU key name.
///
/// Names never contain whitespace or control characters, so a `KeyName` can't smuggle a second
/// monitor command onto the control channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyName(String);

impl KeyName {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(KeyError::Empty);
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(KeyError::InvalidCharacter(name));
        }
        Ok(Self(name))
    }

    /// The Enter/Return key.
    pub fn enter() -> Self {
        Self(ENTER.to_string())
    }

    pub fn is_enter(&self) -> bool {
        self.0 == ENTER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Known-good names baked into the crate.
    pub(crate) fn literal(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid key literal {name:?}");
        Self(name.to_string())
    }

    /// The control-channel line for this key, newline included.
    pub fn command_line(&self) -> String {
        format!("{SENDKEY_COMMAND} {}\n", self.0)
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KeyName {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Keys that type `command` at a shell prompt and submit it with Enter.
pub fn keys_for_command(command: &str) -> Result<Vec<KeyName>, KeyError> {
    let mut keys = command
        .chars()
        .map(key_for_char)
        .collect::<Result<Vec<_>, _>>()?;
    keys.push(KeyName::enter());
    Ok(keys)
}

fn key_for_char(c: char) -> Result<KeyName, KeyError> {
    let name = match c {
        'a'..='z' | '0'..='9' => return Ok(KeyName(c.to_string())),
        'A'..='Z' => return Ok(KeyName(format!("shift-{}", c.to_ascii_lowercase()))),
        ' ' => "spc",
        '\n' => ENTER,
        '\t' => "tab",
        '-' => "minus",
        '=' => "equal",
        '.' => "dot",
        ',' => "comma",
        '/' => "slash",
        ';' => "semicolon",
        '\'' => "apostrophe",
        '\\' => "backslash",
        '[' => "bracket_left",
        ']' => "bracket_right",
        '`' => "grave_accent",
        '_' => "shift-minus",
        '+' => "shift-equal",
        ':' => "shift-semicolon",
        '"' => "shift-apostrophe",
        '|' => "shift-backslash",
        '{' => "shift-bracket_left",
        '}' => "shift-bracket_right",
        '~' => "shift-grave_accent",
        '<' => "shift-comma",
        '>' => "shift-dot",
        '?' => "shift-slash",
        '!' => "shift-1",
        '@' => "shift-2",
        '#' => "shift-3",
        '$' => "shift-4",
        '%' => "shift-5",
        '^' => "shift-6",
        '&' => "shift-7",
        '*' => "shift-8",
        '(' => "shift-9",
        ')' => "shift-0",
        other => return Err(KeyError::Unmapped(other)),
    };
    Ok(KeyName::literal(name))
}

/// Type `keys` into the guest, one `sendkey` line per key, pausing `delay` after each so the
/// guest's keyboard handler sees discrete presses.
///
/// Stops at the first failed write. Keys already sent are not retried.
pub fn send_keys<P, C>(
    process: &mut P,
    keys: &[KeyName],
    delay: Duration,
    clock: &C,
) -> Result<(), PipeError>
where
    P: GuestProcess + ?Sized,
    C: Clock + ?Sized,
{
    for (index, key) in keys.iter().enumerate() {
        let line = key.command_line();
        if let Err(source) = process.write_input(line.as_bytes()) {
            tracing::warn!(index, key = key.as_str(), "control channel write failed: {source}");
            return Err(PipeError {
                index,
                key: key.to_string(),
                source,
            });
        }
        tracing::debug!(index, key = key.as_str(), "sent key");
        clock.sleep(delay);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::launcher::ExitState;
    use std::io;

    /// Accepts `accept` writes, then behaves like a dead process.
    struct RecordingInput {
        written: Vec<u8>,
        writes: usize,
        accept: usize,
    }

    impl RecordingInput {
        fn new(accept: usize) -> Self {
            Self {
                written: Vec::new(),
                writes: 0,
                accept,
            }
        }
    }

    impl GuestProcess for RecordingInput {
        fn write_input(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.writes += 1;
            if self.writes > self.accept {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn read_error_nonblocking(&mut self) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn poll_exit(&mut self) -> io::Result<Option<ExitState>> {
            Ok(None)
        }

        fn terminate(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn keys(names: &[&str]) -> Vec<KeyName> {
        names.iter().map(|n| KeyName::new(*n).unwrap()).collect()
    }

    #[test]
    fn one_line_per_key_in_order() {
        let clock = ManualClock::new();
        let mut input = RecordingInput::new(usize::MAX);

        send_keys(
            &mut input,
            &keys(&["h", "e", "l", "p", "ret"]),
            Duration::from_millis(100),
            &clock,
        )
        .unwrap();

        assert_eq!(
            String::from_utf8(input.written).unwrap(),
            "sendkey h\nsendkey e\nsendkey l\nsendkey p\nsendkey ret\n"
        );
        assert_eq!(clock.sleep_count(), 5);
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn broken_pipe_stops_sending() {
        let clock = ManualClock::new();
        let mut input = RecordingInput::new(2);

        let err = send_keys(
            &mut input,
            &keys(&["h", "e", "l", "p", "ret"]),
            Duration::from_millis(100),
            &clock,
        )
        .unwrap_err();

        assert_eq!(err.index, 2);
        assert_eq!(err.key, "l");
        assert!(err.is_broken_pipe());
        assert_eq!(input.writes, 3, "no writes after the failing one");
        assert_eq!(
            String::from_utf8(input.written).unwrap(),
            "sendkey h\nsendkey e\n"
        );
    }

    #[test]
    fn key_names_reject_command_injection() {
        assert_eq!(KeyName::new(""), Err(KeyError::Empty));
        assert!(matches!(
            KeyName::new("a\nquit"),
            Err(KeyError::InvalidCharacter(_))
        ));
        assert!(matches!(
            KeyName::new("shift a"),
            Err(KeyError::InvalidCharacter(_))
        ));
        assert_eq!("ctrl-alt-delete".parse::<KeyName>().unwrap().as_str(), "ctrl-alt-delete");
    }

    #[test]
    fn enter_is_distinct_from_literal_keys() {
        assert!(KeyName::enter().is_enter());
        assert!(!KeyName::new("r").unwrap().is_enter());
        assert_eq!(KeyName::enter().command_line(), "sendkey ret\n");
    }

    #[test]
    fn command_text_maps_to_qcodes() {
        let names = |cmd: &str| -> Vec<String> {
            keys_for_command(cmd)
                .unwrap()
                .into_iter()
                .map(|k| k.to_string())
                .collect()
        };

        assert_eq!(names("help"), ["h", "e", "l", "p", "ret"]);
        assert_eq!(
            names("echo Hi_2"),
            ["e", "c", "h", "o", "spc", "shift-h", "i", "shift-minus", "2", "ret"]
        );
        assert_eq!(names(""), ["ret"]);
        assert_eq!(keys_for_command("é"), Err(KeyError::Unmapped('é')));
    }
}
