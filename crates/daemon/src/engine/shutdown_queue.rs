// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shutdown queue: a single drainer escalating TERM -> KILL -> abandon
//! on workers being retired.
//!
//! The drainer is the sole mutator of workers on the SHUTDOWN list
//! (additions are atomic appends done elsewhere). It sleeps on the
//! earliest escalation deadline and is woken by list additions, drain
//! requests, and child-exit reports.

use super::adapter::{KillOutcome, KillSignal, ProcessAdapter};
use super::{ControlEvent, Engine};
use fcp_core::{Clock, WorkerPid, WorkerState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// While draining with nothing signalled yet, re-check on a short tick.
const DRAIN_RECHECK: Duration = Duration::from_millis(200);

/// Wake-up plumbing between the engine and the drainer task.
pub(crate) struct ShutdownSignal {
    notify: Notify,
    drain_requested: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        ShutdownSignal { notify: Notify::new(), drain_requested: AtomicBool::new(false) }
    }

    /// Wake the drainer: a worker was added or a child exit was observed.
    pub fn notify_change(&self) {
        self.notify.notify_one();
    }

    /// Ask the drainer to exit once the SHUTDOWN list is empty.
    pub fn request_drain(&self) {
        self.drain_requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn drain_requested(&self) -> bool {
        self.drain_requested.load(Ordering::SeqCst)
    }
}

impl<P, C> Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    /// The drainer task. Runs until a requested drain leaves the SHUTDOWN
    /// list empty, then reports on the control channel and exits.
    pub(crate) async fn run_shutdown_queue(self: Arc<Self>) {
        loop {
            self.shutdown_tick();

            let purged = self.registry().purge_exited();
            if !purged.is_empty() {
                debug!(count = purged.len(), "purged exited workers");
            }

            let draining = self.shutdown_signal().drain_requested();
            if draining && self.registry().shutdown_is_empty() {
                let _ = self.events().send(ControlEvent::ShutdownDrained);
                return;
            }

            let deadline = self
                .registry()
                .min_signal_deadline(self.options().term_timeout)
                .map(|instant| {
                    // Clock-relative deadline, expressed as a duration from now
                    instant.saturating_duration_since(self.clock().now())
                });

            let notified = self.shutdown_signal().notify.notified();
            match deadline {
                Some(wait) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None if draining => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(DRAIN_RECHECK) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// One pass over the SHUTDOWN list.
    ///
    /// The first TERM goes out on the first tick after a worker enters the
    /// list; TERM and KILL escalate after `term_timeout`; a worker that
    /// outlives KILL by another `term_timeout` is abandoned with a
    /// warning.
    pub(crate) fn shutdown_tick(&self) {
        let now = self.clock().now();
        let timeout = self.options().term_timeout;

        for (pid, state, last_signal) in self.registry().shutdown_snapshot() {
            match state {
                s if s.awaits_first_signal() => {
                    self.signal_worker(pid, KillSignal::Term, WorkerState::Term);
                }
                WorkerState::Term => {
                    if due(last_signal, timeout, now) {
                        info!(%pid, timeout_secs = timeout.as_secs(), "term timeout, sending KILL");
                        self.signal_worker(pid, KillSignal::Kill, WorkerState::Kill);
                    }
                }
                WorkerState::Kill => {
                    if due(last_signal, timeout, now) {
                        warn!(%pid, "worker survived SIGKILL, abandoning it");
                        self.mark_exited(pid);
                    }
                }
                WorkerState::Exit => {}
                _ => {}
            }
        }
    }

    fn signal_worker(&self, pid: WorkerPid, signal: KillSignal, next: WorkerState) {
        match self.adapter().kill(pid, signal) {
            Ok(KillOutcome::Signalled) => {
                debug!(%pid, ?signal, "signalled worker");
                if let Err(error) = self.registry().set_state(pid, next, self.clock().now()) {
                    warn!(%pid, %error, "cannot record signal state");
                }
            }
            Ok(KillOutcome::NoSuchProcess) => self.mark_exited(pid),
            // Transient failure: state unchanged, retried next tick
            Err(error) => error!(%pid, %error, "kill failed"),
        }
    }

    fn mark_exited(&self, pid: WorkerPid) {
        if let Err(error) = self.registry().set_state(pid, WorkerState::Exit, self.clock().now()) {
            warn!(%pid, %error, "cannot mark worker exited");
        }
    }
}

fn due(last_signal: Option<std::time::Instant>, timeout: Duration, now: std::time::Instant) -> bool {
    match last_signal {
        Some(stamp) => now.saturating_duration_since(stamp) >= timeout,
        // No stamp recorded: treat as due so the state cannot wedge
        None => true,
    }
}

#[cfg(test)]
#[path = "shutdown_queue_tests.rs"]
mod tests;
