mod harness;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_configuration_surface() {
    Command::new(env!("CARGO_BIN_EXE_davos-boot-check"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--image"))
        .stdout(predicate::str::contains("--log"))
        .stdout(predicate::str::contains("--boot-marker"))
        .stdout(predicate::str::contains("--boot-timeout"))
        .stdout(predicate::str::contains("--keys"))
        .stdout(predicate::str::contains("--result-marker"))
        .stdout(predicate::str::contains("--result-timeout"))
        .stdout(predicate::str::contains("DAVOS_QEMU"));
}

#[test]
fn missing_emulator_is_a_launch_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-qemu");

    harness::boot_check(tmp.path(), &missing)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("ERROR: launch failure"))
        .stdout(predicate::str::contains("emulator executable not found"))
        .stdout(predicate::str::contains("qemu.log not found."));
}

#[test]
fn rejects_untypeable_command() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-qemu");

    harness::boot_check(tmp.path(), &missing)
        .args(["--command", "héllo"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot type command"));
}

#[test]
fn rejects_key_names_with_whitespace() {
    Command::new(env!("CARGO_BIN_EXE_davos-boot-check"))
        .args(["--keys", "h,e l"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("whitespace"));
}

#[test]
fn rejects_empty_boot_marker() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-qemu");

    harness::boot_check(tmp.path(), &missing)
        .args(["--boot-marker", ""])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("boot marker must not be empty"));
}

#[test]
fn later_flag_overrides_earlier_one() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("no-such-qemu");

    // The empty marker given last wins and is rejected.
    harness::boot_check(tmp.path(), &missing)
        .args(["--boot-marker", "DavOS", "--boot-marker", ""])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("boot marker must not be empty"));

    // Overridden by a valid marker, the run proceeds to launch.
    harness::boot_check(tmp.path(), &missing)
        .args(["--boot-marker", "", "--boot-marker", "DavOS"])
        .args(["--boot-timeout", "1"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("ERROR: launch failure"));
}
