// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process adapter: the engine's view of the operating system.
//!
//! The engine spawns, signals, and probes worker processes only through
//! this trait, so the whole scheduling machinery runs against a fake in
//! tests.

use super::events::ControlEvent;
use fcp_core::{ProjectSettings, WorkerPid};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::process::Stdio;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Signals the shutdown queue escalates through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
}

/// Result of delivering a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Signalled,
    /// The pid no longer names a process.
    NoSuchProcess,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("project '{0}' has no process path configured")]
    NoCommand(String),

    #[error("cannot spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawned '{command}' but no pid is available")]
    NoPid { command: String },
}

/// Spawn, signal, and probe worker processes.
pub trait ProcessAdapter: Send + Sync + 'static {
    /// Start a worker for `project`. The worker accepts FastCGI
    /// connections on `listener`, which it receives as the well-known
    /// listen descriptor (fd 0).
    fn spawn(
        &self,
        project: &ProjectSettings,
        listener: UnixListener,
    ) -> Result<WorkerPid, SpawnError>;

    /// Deliver a signal to a worker.
    fn kill(&self, pid: WorkerPid, signal: KillSignal) -> std::io::Result<KillOutcome>;

    /// Liveness probe (signal 0).
    fn alive(&self, pid: WorkerPid) -> bool;
}

/// Real adapter: fork/exec via `tokio::process` plus `kill(2)`.
///
/// Each spawned child gets a monitor task awaiting its exit; the exit is
/// reported on the control channel. Tokio reaps the child, so no SIGCHLD
/// bookkeeping is needed.
pub struct UnixProcessAdapter {
    events: UnboundedSender<ControlEvent>,
}

impl UnixProcessAdapter {
    pub fn new(events: UnboundedSender<ControlEvent>) -> Self {
        UnixProcessAdapter { events }
    }
}

impl ProcessAdapter for UnixProcessAdapter {
    fn spawn(
        &self,
        project: &ProjectSettings,
        listener: UnixListener,
    ) -> Result<WorkerPid, SpawnError> {
        let command_path = project
            .command
            .as_ref()
            .ok_or_else(|| SpawnError::NoCommand(project.name.clone()))?;
        let command_text = command_path.display().to_string();

        let mut command = tokio::process::Command::new(command_path);
        command
            .args(&project.args)
            .current_dir(&project.cwd)
            // FastCGI workers accept() on fd 0
            .stdin(Stdio::from(OwnedFd::from(listener)))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in &project.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|source| SpawnError::Spawn { command: command_text.clone(), source })?;
        let pid = child
            .id()
            .map(|id| WorkerPid(id as i32))
            .ok_or(SpawnError::NoPid { command: command_text })?;

        let events = self.events.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(%pid, %status, "worker exited"),
                Err(error) => warn!(%pid, %error, "wait for worker failed"),
            }
            let _ = events.send(ControlEvent::WorkerExited { pid });
        });

        Ok(pid)
    }

    fn kill(&self, pid: WorkerPid, signal: KillSignal) -> std::io::Result<KillOutcome> {
        let signal = match signal {
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
        };
        match kill(Pid::from_raw(pid.as_raw()), Some(signal)) {
            Ok(()) => Ok(KillOutcome::Signalled),
            Err(nix::errno::Errno::ESRCH) => Ok(KillOutcome::NoSuchProcess),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    fn alive(&self, pid: WorkerPid) -> bool {
        kill(Pid::from_raw(pid.as_raw()), None).is_ok()
    }
}
