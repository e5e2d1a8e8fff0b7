// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity, states, and list membership.

use std::fmt;
use std::time::Instant;

/// OS process id of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerPid(pub i32);

impl WorkerPid {
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WorkerPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a worker process.
///
/// Healthy workers take START → INIT → IDLE ↔ BUSY; retirement runs
/// TERM → KILL → EXIT. OPEN_IDLE (worker holding its previous connection
/// open) never occurs while KEEP_CONN is cleared, but the state is
/// representable since retirement must handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Start,
    Init,
    Idle,
    OpenIdle,
    Busy,
    Term,
    Kill,
    Exit,
}

impl WorkerState {
    /// Whether the `from → to` transition is legal.
    ///
    /// Any live state may jump straight to TERM (retirement) or to EXIT
    /// (the process vanished before it could be signalled).
    pub fn may_transition(from: WorkerState, to: WorkerState) -> bool {
        use WorkerState::*;
        match (from, to) {
            (Start, Init) => true,
            (Init, Idle) => true,
            (Idle, Busy) | (Busy, Idle) => true,
            (Idle, OpenIdle) | (OpenIdle, Idle) | (OpenIdle, Busy) => true,
            (Start | Init | Idle | OpenIdle | Busy, Term) => true,
            (Term, Kill) => true,
            (Term | Kill, Exit) => true,
            (Start | Init | Idle | OpenIdle | Busy, Exit) => true,
            _ => false,
        }
    }

    /// States the shutdown drainer still has to signal.
    pub fn awaits_first_signal(self) -> bool {
        matches!(
            self,
            WorkerState::Start
                | WorkerState::Init
                | WorkerState::Idle
                | WorkerState::OpenIdle
                | WorkerState::Busy
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Start => "start",
            WorkerState::Init => "init",
            WorkerState::Idle => "idle",
            WorkerState::OpenIdle => "open-idle",
            WorkerState::Busy => "busy",
            WorkerState::Term => "term",
            WorkerState::Kill => "kill",
            WorkerState::Exit => "exit",
        };
        f.write_str(name)
    }
}

/// The three disjoint sets partitioning living workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerList {
    /// Warming up, never dispatchable.
    Init,
    /// Dispatchable (IDLE) or dispatched (BUSY).
    Active,
    /// Being retired.
    Shutdown,
}

impl fmt::Display for WorkerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerList::Init => "init",
            WorkerList::Active => "active",
            WorkerList::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// One worker as the registry tracks it.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub pid: WorkerPid,
    pub project: String,
    pub state: WorkerState,
    pub list: WorkerList,
    /// Abstract-namespace socket name the worker accepts on.
    pub socket: String,
    pub started_at: Instant,
    /// Set iff state is TERM or KILL.
    pub last_signal: Option<Instant>,
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
