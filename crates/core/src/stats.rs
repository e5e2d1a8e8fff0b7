// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime statistics, reported to the log on SIGUSR1.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Counters {
    connections: u64,
    connection_time: Duration,
    process_starts: u64,
}

/// Accumulates connection and process-start counters since startup.
#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    counters: Mutex<Counters>,
}

impl Stats {
    pub fn new(now: Instant) -> Self {
        Stats { started_at: now, counters: Mutex::new(Counters::default()) }
    }

    /// Record a completed connection and its wall time.
    pub fn add_connection(&self, elapsed: Duration) {
        let mut counters = self.counters.lock();
        counters.connections += 1;
        counters.connection_time += elapsed;
    }

    /// Record `n` worker process starts.
    pub fn add_process_starts(&self, n: u64) {
        self.counters.lock().process_starts += n;
    }

    pub fn connections(&self) -> u64 {
        self.counters.lock().connections
    }

    pub fn process_starts(&self) -> u64 {
        self.counters.lock().process_starts
    }

    /// One-line summary for the log.
    pub fn summary(&self, now: Instant) -> String {
        let counters = self.counters.lock();
        let uptime = now.duration_since(self.started_at);
        let avg_ms = if counters.connections > 0 {
            counters.connection_time.as_millis() / counters.connections as u128
        } else {
            0
        };
        format!(
            "uptime {}s, {} connections ({} ms avg), {} process starts",
            uptime.as_secs(),
            counters.connections,
            avg_ms,
            counters.process_starts
        )
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
