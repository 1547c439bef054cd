//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

const CUSTOM_DEVICE: &str = r#"
[[device]]
name = "ATSAM3X8E"
efc_command_register = 0x400E0A04
efc_status_register = 0x400E0A08
write_page_command = 3
flash_start_address = 0x00080000
page_size = 256
set_gpnvm_command = 11
clear_gpnvm_command = 12
boot_bits = [false, true, false]
"#;

/// Command isolated from the user's environment and config files.
fn cli_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("samflash");
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env_remove("SAMFLASH_PORT")
        .env_remove("SAMFLASH_BAUD")
        .env_remove("SAMFLASH_DEVICE")
        .env_remove("SAMFLASH_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

fn missing_port(dir: &Path) -> String {
    dir.join("no-such-tty").to_string_lossy().into_owned()
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("samflash"))
        .stdout(predicate::str::contains("Usage"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("samflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_every_subcommand() {
    let dir = tempdir().unwrap();
    let assert = cli_cmd(dir.path()).arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    for sub in [
        "write",
        "verify",
        "set-boot",
        "erase",
        "chip-id",
        "flash-info",
        "uid",
        "list-ports",
        "list-devices",
        "completions",
    ] {
        assert!(stdout.contains(sub), "help should mention {sub}");
    }
}

#[test]
fn exit_code_two_for_unknown_command_and_flag() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);

    cli_cmd(dir.path())
        .arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn write_without_file_is_usage_error() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .arg("write")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn list_devices_json_includes_builtin_profiles() {
    let dir = tempdir().unwrap();
    let output = cli_cmd(dir.path())
        .args(["list-devices", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    assert!(output.stderr.is_empty());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["ok"], true);
    let names: Vec<&str> = parsed["data"]["devices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["AT91SAM3U4E", "AT91SAM7X512"]);
}

#[test]
fn list_devices_includes_config_profiles() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("samflash.toml"), CUSTOM_DEVICE).unwrap();

    let output = cli_cmd(dir.path())
        .args(["list-devices", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let devices = parsed["data"]["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0]["name"], "ATSAM3X8E");
    assert_eq!(devices[0]["builtin"], false);
}

#[test]
fn invalid_config_file_warns_but_continues() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("samflash.toml"), "invalid toml [[[").unwrap();

    cli_cmd(dir.path())
        .arg("list-devices")
        .assert()
        .success()
        .stderr(predicate::str::contains("TOML"))
        .stderr(predicate::str::contains("AT91SAM3U4E"));
}

#[test]
fn list_ports_json_is_clean() {
    let dir = tempdir().unwrap();
    let output = cli_cmd(dir.path())
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.is_empty(), "JSON output should not have stderr: got {stderr}");
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn unknown_device_is_usage_error() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "SAMD21", "-p"])
        .arg(missing_port(dir.path()))
        .arg("set-boot")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Unknown device"));
}

#[test]
fn missing_device_is_usage_error() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-p"])
        .arg(missing_port(dir.path()))
        .arg("uid")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--device"));
}

#[test]
fn device_from_environment_is_used() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .env("SAMFLASH_DEVICE", "nonexistent-chip")
        .args(["--non-interactive", "-p"])
        .arg(missing_port(dir.path()))
        .arg("set-boot")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("nonexistent-chip"));
}

#[test]
fn write_to_missing_port_fails_without_stdout() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("fw.bin");
    fs::write(&image, [0xA5u8; 300]).unwrap();

    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "AT91SAM3U4E", "-p"])
        .arg(missing_port(dir.path()))
        .arg("write")
        .arg(&image)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn write_missing_image_fails_before_opening_port() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "AT91SAM3U4E", "-p"])
        .arg(missing_port(dir.path()))
        .args(["write", "does-not-exist.bin"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to read image"));
}

#[test]
fn chip_id_json_error_keeps_stdout_clean() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "AT91SAM3U4E", "-p"])
        .arg(missing_port(dir.path()))
        .args(["chip-id", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn erase_unsupported_on_sam3u() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "AT91SAM3U4E", "-p"])
        .arg(missing_port(dir.path()))
        .args(["erase", "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("erase-all"));
}

#[test]
fn erase_needs_yes_when_non_interactive() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["--non-interactive", "-d", "AT91SAM7X512", "-p"])
        .arg(missing_port(dir.path()))
        .arg("erase")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn completions_command_writes_to_stdout() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("samflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_detect_shell_from_environment() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .env("SHELL", "/usr/bin/zsh")
        .arg("completions")
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef samflash"));
}

#[test]
fn completions_without_detectable_shell_is_usage_error() {
    let dir = tempdir().unwrap();
    cli_cmd(dir.path())
        .env_remove("SHELL")
        .env_remove("PSModulePath")
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("completions bash"));
}

#[test]
fn colors_disabled_when_not_tty() {
    let dir = tempdir().unwrap();
    let output = cli_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}
