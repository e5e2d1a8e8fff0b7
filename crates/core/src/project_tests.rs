// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for project settings.

use super::*;
use regex::Regex;

#[test]
fn defaults_match_configuration_defaults() {
    let project = ProjectSettings::named("maps");
    assert_eq!(project.min_proc, 1);
    assert_eq!(project.max_proc, 20);
    assert_eq!(project.cwd, std::path::PathBuf::from("/"));
    assert!(!project.is_launchable());
}

#[test]
fn matches_uses_compiled_regex() {
    let mut project = ProjectSettings::named("maps");
    project.scan_regex = Some(Regex::new("^map=foo$").unwrap());
    assert!(project.matches("map=foo"));
    assert!(!project.matches("map=foobar"));
}

#[test]
fn project_without_regex_matches_nothing() {
    let project = ProjectSettings::named("maps");
    assert!(!project.matches("anything"));
}

#[test]
fn same_as_compares_regex_by_pattern() {
    let mut a = ProjectSettings::named("maps");
    let mut b = ProjectSettings::named("maps");
    a.scan_regex = Some(Regex::new("^x$").unwrap());
    b.scan_regex = Some(Regex::new("^x$").unwrap());
    assert!(a.same_as(&b));

    b.scan_regex = Some(Regex::new("^y$").unwrap());
    assert!(!a.same_as(&b));

    b.scan_regex = a.scan_regex.clone();
    b.min_proc = 9;
    assert!(!a.same_as(&b));
}
