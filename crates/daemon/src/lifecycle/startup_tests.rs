// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for startup plumbing.

use super::*;
use fcp_config::GlobalSettings;

#[test]
fn pidfile_holds_pid_and_vanishes_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fcgipool.pid");

    let pidfile = write_pidfile(&path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());

    drop(pidfile);
    assert!(!path.exists());
}

#[test]
fn pidfile_in_missing_directory_errors() {
    let err =
        write_pidfile(std::path::Path::new("/nonexistent-dir/fcgipool.pid")).unwrap_err();
    assert!(matches!(err, LifecycleError::PidFile { .. }));
}

#[test]
fn bind_listener_on_wildcard_ephemeral_port() {
    let global = GlobalSettings { port: 0, ..GlobalSettings::default() };
    let listener = bind_listener(&global).unwrap();
    assert_ne!(listener.local_addr().unwrap().port(), 0);
}

#[test]
fn bind_listener_on_loopback() {
    let global =
        GlobalSettings { listen: "127.0.0.1".to_string(), port: 0, ..GlobalSettings::default() };
    let listener = bind_listener(&global).unwrap();
    assert!(listener.local_addr().unwrap().ip().is_loopback());
}

#[test]
fn bind_listener_rejects_unresolvable_host() {
    let global = GlobalSettings {
        listen: "host.invalid.fcgipool.test".to_string(),
        port: 0,
        ..GlobalSettings::default()
    };
    assert!(bind_listener(&global).is_err());
}

#[test]
fn resource_limit_check_passes_with_no_projects() {
    check_resource_limits(&[]).unwrap();
}
