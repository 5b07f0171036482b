#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

/// Stand-in for `qemu-system-i386`: writes a boot banner to the `-debugcon file:` path and
/// answers a typed `help` with the shell's command list.
pub const SHELL_GUEST: &str = r#"#!/bin/sh
log=
prev=
for arg in "$@"; do
  if [ "$prev" = "-debugcon" ]; then log="${arg#file:}"; fi
  prev="$arg"
done
[ -n "$log" ] || { echo "stub: missing -debugcon" >&2; exit 2; }
printf 'SeaBIOS\nWelcome to DavOS\n> ' >> "$log"
typed=
while IFS= read -r line; do
  case "$line" in
    "sendkey ret")
      [ "$typed" = help ] && printf 'help\nCommands: help, clear, echo\n> ' >> "$log"
      typed=
      ;;
    "sendkey "?) typed="$typed${line#sendkey }" ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Boots to the prompt but never reacts to keys.
pub const DEAF_GUEST: &str = r#"#!/bin/sh
prev=
for arg in "$@"; do
  if [ "$prev" = "-debugcon" ]; then printf 'DavOS> ' >> "${arg#file:}"; fi
  prev="$arg"
done
while IFS= read -r line; do
  [ "$line" = quit ] && exit 0
done
"#;

/// Dies before the guest starts, like QEMU with a bad `-cdrom` path.
pub const CRASHING_EMULATOR: &str = r#"#!/bin/sh
echo "qemu-system-i386: -cdrom build/dav-go-os.iso: Could not open 'build/dav-go-os.iso': No such file or directory" >&2
exit 1
"#;

pub fn write_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// `davos-boot-check` with fast timings, pointed at `emulator` and a log inside `dir`.
pub fn boot_check(dir: &Path, emulator: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_davos-boot-check"));
    cmd.env_remove("GITHUB_ACTIONS")
        .args(["--image", "dav-go-os.iso"])
        .arg("--log")
        .arg(dir.join("qemu.log"))
        .arg("--qemu")
        .arg(emulator)
        .args([
            "--boot-timeout",
            "5",
            "--result-timeout",
            "5",
            "--poll-interval-ms",
            "50",
            "--key-delay-ms",
            "10",
            "--terminate-grace-ms",
            "2000",
        ]);
    cmd
}
