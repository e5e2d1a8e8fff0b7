// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The process registry: projects, workers, and every transition between
//! their states and lists.
//!
//! All mutating queries run under one lock, so compound operations like
//! "find an idle worker and mark it busy" are atomic. Workers are kept in
//! spawn order, which makes idle selection FIFO per project.

use crate::project::ProjectSettings;
use crate::worker::{WorkerList, WorkerPid, WorkerRecord, WorkerState};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from registry queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown project '{0}'")]
    UnknownProject(String),

    #[error("unknown worker pid {0}")]
    UnknownWorker(WorkerPid),

    #[error("worker pid {0} already registered")]
    DuplicateWorker(WorkerPid),

    #[error("illegal transition {from} -> {to} for worker {pid}")]
    IllegalTransition { pid: WorkerPid, from: WorkerState, to: WorkerState },
}

struct ProjectEntry {
    settings: ProjectSettings,
    /// Startup failures since the last config change.
    crashes: u32,
}

#[derive(Default)]
struct Inner {
    /// Configured order is preserved; project matching walks this order.
    projects: Vec<ProjectEntry>,
    /// Spawn order is preserved; idle selection walks this order.
    workers: Vec<WorkerRecord>,
}

impl Inner {
    fn project_mut(&mut self, name: &str) -> Result<&mut ProjectEntry, RegistryError> {
        self.projects
            .iter_mut()
            .find(|p| p.settings.name == name)
            .ok_or_else(|| RegistryError::UnknownProject(name.to_string()))
    }

    fn worker_mut(&mut self, pid: WorkerPid) -> Result<&mut WorkerRecord, RegistryError> {
        self.workers
            .iter_mut()
            .find(|w| w.pid == pid)
            .ok_or(RegistryError::UnknownWorker(pid))
    }

    fn worker(&self, pid: WorkerPid) -> Result<&WorkerRecord, RegistryError> {
        self.workers
            .iter()
            .find(|w| w.pid == pid)
            .ok_or(RegistryError::UnknownWorker(pid))
    }

    fn apply_state(
        record: &mut WorkerRecord,
        to: WorkerState,
        now: Instant,
    ) -> Result<WorkerState, RegistryError> {
        let from = record.state;
        if from == to {
            return Ok(from);
        }
        if !WorkerState::may_transition(from, to) {
            return Err(RegistryError::IllegalTransition { pid: record.pid, from, to });
        }
        record.state = to;
        // last_signal is set iff the worker sits in TERM or KILL
        record.last_signal = match to {
            WorkerState::Term | WorkerState::Kill => Some(now),
            _ => None,
        };
        Ok(from)
    }
}

/// Thread-safe in-memory store of projects and workers.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    // ---- projects ----

    /// Insert or replace a project's settings. The crash counter of an
    /// existing project is preserved; resets are explicit.
    pub fn upsert_project(&self, settings: ProjectSettings) {
        let mut inner = self.inner.lock();
        match inner.projects.iter_mut().find(|p| p.settings.name == settings.name) {
            Some(entry) => entry.settings = settings,
            None => inner.projects.push(ProjectEntry { settings, crashes: 0 }),
        }
    }

    pub fn remove_project(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let before = inner.projects.len();
        inner.projects.retain(|p| p.settings.name != name);
        if inner.projects.len() == before {
            return Err(RegistryError::UnknownProject(name.to_string()));
        }
        Ok(())
    }

    /// Project names in configured order.
    pub fn project_names(&self) -> Vec<String> {
        self.inner.lock().projects.iter().map(|p| p.settings.name.clone()).collect()
    }

    pub fn project(&self, name: &str) -> Result<ProjectSettings, RegistryError> {
        self.inner
            .lock()
            .projects
            .iter()
            .find(|p| p.settings.name == name)
            .map(|p| p.settings.clone())
            .ok_or_else(|| RegistryError::UnknownProject(name.to_string()))
    }

    /// All project settings in configured order.
    pub fn projects(&self) -> Vec<ProjectSettings> {
        self.inner.lock().projects.iter().map(|p| p.settings.clone()).collect()
    }

    // ---- crash accounting ----

    pub fn crashes(&self, name: &str) -> Result<u32, RegistryError> {
        let mut inner = self.inner.lock();
        Ok(inner.project_mut(name)?.crashes)
    }

    /// Increment and return the new count.
    pub fn inc_crashes(&self, name: &str) -> Result<u32, RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner.project_mut(name)?;
        entry.crashes += 1;
        Ok(entry.crashes)
    }

    pub fn reset_crashes(&self, name: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        inner.project_mut(name)?.crashes = 0;
        Ok(())
    }

    // ---- workers ----

    /// Register a freshly spawned worker: state START, list INIT.
    pub fn add_worker(
        &self,
        pid: WorkerPid,
        project: &str,
        socket: impl Into<String>,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if !inner.projects.iter().any(|p| p.settings.name == project) {
            return Err(RegistryError::UnknownProject(project.to_string()));
        }
        if inner.workers.iter().any(|w| w.pid == pid) {
            return Err(RegistryError::DuplicateWorker(pid));
        }
        inner.workers.push(WorkerRecord {
            pid,
            project: project.to_string(),
            state: WorkerState::Start,
            list: WorkerList::Init,
            socket: socket.into(),
            started_at: now,
            last_signal: None,
        });
        Ok(())
    }

    /// Record a state transition, validating legality and maintaining the
    /// last-signal stamp.
    pub fn set_state(
        &self,
        pid: WorkerPid,
        to: WorkerState,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let record = inner.worker_mut(pid)?;
        Inner::apply_state(record, to, now)?;
        Ok(())
    }

    pub fn worker_state(&self, pid: WorkerPid) -> Result<WorkerState, RegistryError> {
        Ok(self.inner.lock().worker(pid)?.state)
    }

    pub fn worker_list(&self, pid: WorkerPid) -> Result<WorkerList, RegistryError> {
        Ok(self.inner.lock().worker(pid)?.list)
    }

    pub fn worker_project(&self, pid: WorkerPid) -> Result<String, RegistryError> {
        Ok(self.inner.lock().worker(pid)?.project.clone())
    }

    pub fn worker_socket(&self, pid: WorkerPid) -> Result<String, RegistryError> {
        Ok(self.inner.lock().worker(pid)?.socket.clone())
    }

    /// Count the project's workers in any of `states`, regardless of list.
    pub fn count_states(&self, project: &str, states: &[WorkerState]) -> usize {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|w| w.project == project && states.contains(&w.state))
            .count()
    }

    /// Number of workers on the project's ACTIVE list.
    pub fn active_count(&self, project: &str) -> usize {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|w| w.project == project && w.list == WorkerList::Active)
            .count()
    }

    /// Workers of the project not yet being retired (INIT or ACTIVE),
    /// the figure `max_proc` bounds.
    pub fn pool_size(&self, project: &str) -> usize {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|w| w.project == project && w.list != WorkerList::Shutdown)
            .count()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Atomic dispatch primitive: pick the oldest IDLE worker on the
    /// project's ACTIVE list and mark it BUSY, all in one critical section.
    pub fn acquire_idle(&self, project: &str) -> Option<WorkerPid> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let record = inner.workers.iter_mut().find(|w| {
            w.project == project && w.list == WorkerList::Active && w.state == WorkerState::Idle
        })?;
        // Idle -> Busy is always legal; apply_state cannot fail here.
        Inner::apply_state(record, WorkerState::Busy, now).ok()?;
        Some(record.pid)
    }

    // ---- bulk list moves ----

    /// INIT → ACTIVE for every worker of the project that finished warm-up
    /// (state IDLE). Returns how many moved.
    pub fn move_idle_init_to_active(&self, project: &str) -> usize {
        let mut inner = self.inner.lock();
        let mut moved = 0;
        for w in inner.workers.iter_mut() {
            if w.project == project && w.list == WorkerList::Init && w.state == WorkerState::Idle {
                w.list = WorkerList::Active;
                moved += 1;
            }
        }
        moved
    }

    /// Move the project's entire ACTIVE list to SHUTDOWN.
    pub fn move_active_to_shutdown(&self, project: &str) -> Vec<WorkerPid> {
        self.move_list(Some(project), WorkerList::Active)
    }

    /// Move the project's entire INIT list to SHUTDOWN.
    pub fn move_init_to_shutdown(&self, project: &str) -> Vec<WorkerPid> {
        self.move_list(Some(project), WorkerList::Init)
    }

    /// Move every worker of every project to SHUTDOWN.
    pub fn move_all_to_shutdown(&self) -> Vec<WorkerPid> {
        let mut pids = self.move_list(None, WorkerList::Init);
        pids.extend(self.move_list(None, WorkerList::Active));
        pids
    }

    fn move_list(&self, project: Option<&str>, from: WorkerList) -> Vec<WorkerPid> {
        let mut inner = self.inner.lock();
        let mut pids = Vec::new();
        for w in inner.workers.iter_mut() {
            if w.list == from && project.is_none_or(|p| w.project == p) {
                w.list = WorkerList::Shutdown;
                pids.push(w.pid);
            }
        }
        pids
    }

    /// Move one worker to SHUTDOWN; idempotent for workers already there.
    pub fn move_worker_to_shutdown(&self, pid: WorkerPid) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        inner.worker_mut(pid)?.list = WorkerList::Shutdown;
        Ok(())
    }

    // ---- shutdown drainer queries ----

    /// Snapshot of the SHUTDOWN list for one drainer tick.
    pub fn shutdown_snapshot(&self) -> Vec<(WorkerPid, WorkerState, Option<Instant>)> {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|w| w.list == WorkerList::Shutdown)
            .map(|w| (w.pid, w.state, w.last_signal))
            .collect()
    }

    pub fn shutdown_is_empty(&self) -> bool {
        !self.inner.lock().workers.iter().any(|w| w.list == WorkerList::Shutdown)
    }

    /// Remove EXIT workers from the SHUTDOWN list; returns their pids.
    pub fn purge_exited(&self) -> Vec<WorkerPid> {
        let mut inner = self.inner.lock();
        let mut purged = Vec::new();
        inner.workers.retain(|w| {
            if w.list == WorkerList::Shutdown && w.state == WorkerState::Exit {
                purged.push(w.pid);
                false
            } else {
                true
            }
        });
        purged
    }

    /// Earliest pending TERM/KILL escalation deadline across the SHUTDOWN
    /// list, given the configured timeout.
    pub fn min_signal_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|w| {
                w.list == WorkerList::Shutdown
                    && matches!(w.state, WorkerState::Term | WorkerState::Kill)
            })
            .filter_map(|w| w.last_signal)
            .map(|stamp| stamp + timeout)
            .min()
    }

    /// Human-readable dump of the whole registry (SIGUSR2).
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for entry in &inner.projects {
            let _ = writeln!(
                out,
                "project '{}' (min {}, max {}, crashes {})",
                entry.settings.name, entry.settings.min_proc, entry.settings.max_proc, entry.crashes
            );
            for w in inner.workers.iter().filter(|w| w.project == entry.settings.name) {
                let _ = writeln!(
                    out,
                    "  worker {} list {} state {} socket {}",
                    w.pid, w.list, w.state, w.socket
                );
            }
        }
        let orphans: Vec<_> = inner
            .workers
            .iter()
            .filter(|w| !inner.projects.iter().any(|p| p.settings.name == w.project))
            .collect();
        for w in orphans {
            let _ = writeln!(
                out,
                "worker {} of removed project '{}' list {} state {}",
                w.pid, w.project, w.list, w.state
            );
        }
        out
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
