// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface tests for the `fcgipoold` binary.

// Allow panic!/unwrap/expect in test code
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use assert_cmd::Command;

#[test]
fn help_describes_the_flags() {
    let output = Command::cargo_bin("fcgipoold").unwrap().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).into_owned();
    assert!(stdout.contains("-c"), "config flag documented");
    assert!(stdout.contains("-d"), "foreground flag documented");
    assert!(stdout.contains("FastCGI"), "describes itself");
}

#[test]
fn version_prints_and_exits() {
    let output = Command::cargo_bin("fcgipoold").unwrap().arg("-V").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).into_owned();
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_config_file_is_a_fatal_startup_error() {
    Command::cargo_bin("fcgipoold")
        .unwrap()
        .args(["-d", "-c", "/nonexistent/fcgipool.conf"])
        .assert()
        .failure();
}
