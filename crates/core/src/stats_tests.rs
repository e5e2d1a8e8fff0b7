// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for the statistics accumulator.

use super::*;

#[test]
fn accumulates_connections_and_starts() {
    let start = Instant::now();
    let stats = Stats::new(start);
    stats.add_connection(Duration::from_millis(100));
    stats.add_connection(Duration::from_millis(300));
    stats.add_process_starts(3);

    assert_eq!(stats.connections(), 2);
    assert_eq!(stats.process_starts(), 3);

    let summary = stats.summary(start + Duration::from_secs(5));
    assert!(summary.contains("uptime 5s"));
    assert!(summary.contains("2 connections"));
    assert!(summary.contains("200 ms avg"));
    assert!(summary.contains("3 process starts"));
}

#[test]
fn summary_with_no_connections_has_zero_average() {
    let start = Instant::now();
    let stats = Stats::new(start);
    assert!(stats.summary(start).contains("0 connections (0 ms avg)"));
}
