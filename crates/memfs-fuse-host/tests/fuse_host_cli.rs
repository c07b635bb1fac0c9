// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::process::Command;

fn host_binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_memfs-fuse-host"))
}

#[test]
fn fuse_host_binary_help_runs() {
    // --help must not attempt a mount.
    let output = host_binary().arg("--help").output().expect("able to execute memfs-fuse-host");
    assert!(output.status.success(), "--help should succeed");

    let help = String::from_utf8_lossy(&output.stdout);
    for flag in ["--config", "--allow-other", "--auto-unmount", "--no-readdir-plus", "--log-level"] {
        assert!(help.contains(flag), "help text is missing {flag}");
    }
}

#[test]
fn fuse_host_rejects_missing_mount_point() {
    let output = host_binary().output().expect("able to execute memfs-fuse-host");
    assert!(!output.status.success());
}

#[test]
fn fuse_host_rejects_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("memfs.json");
    std::fs::write(&config, r#"{ "root_mode": 131071 }"#).expect("write config");

    let output = host_binary()
        .arg(dir.path())
        .arg("--config")
        .arg(&config)
        .output()
        .expect("able to execute memfs-fuse-host");
    assert!(!output.status.success(), "root_mode outside 0o7777 must be refused");
}
