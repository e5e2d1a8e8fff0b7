// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool supervision: batch starts, warm-up, and crash accounting.

use super::adapter::ProcessAdapter;
use super::warmup;
use fcp_core::{Clock, ProjectSettings, WorkerPid, WorkerState};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Startup failures after which a project stops respawning until its
/// configuration changes.
pub(crate) const MAX_CRASHES: u32 = 5;

use super::Engine;

impl<P, C> Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    /// Start `count` workers for `project` and wait for their warm-ups.
    ///
    /// With `exchange`, the project's current ACTIVE list is retired first
    /// and its crash counter reset (the recycle path after a config
    /// change). Finally every warmed-up worker moves INIT -> ACTIVE in one
    /// bulk step.
    pub async fn start_new_process_wait(&self, count: u32, project: &str, exchange: bool) {
        let Ok(settings) = self.registry().project(project) else {
            warn!(project, "cannot start workers for unknown project");
            return;
        };
        if !settings.is_launchable() {
            info!(project, "no process path configured, not starting workers");
            return;
        }
        if count == 0 {
            return;
        }
        let Some(engine) = self.strong() else { return };

        info!(project, count, "starting worker processes");
        let started = self.clock().now();

        let mut batch = JoinSet::new();
        for _ in 0..count {
            let engine = Arc::clone(&engine);
            let settings = settings.clone();
            batch.spawn(async move { engine.spawn_and_warm(&settings).await });
        }
        while batch.join_next().await.is_some() {}

        if exchange {
            let retired = self.registry().move_active_to_shutdown(project);
            if !retired.is_empty() {
                info!(project, count = retired.len(), "exchanged active workers");
                self.shutdown_signal().notify_change();
            }
            // The exchange is driven by a config change, which also clears
            // the project's startup-failure history
            let _ = self.registry().reset_crashes(project);
        }

        let activated = self.registry().move_idle_init_to_active(project);
        self.stats().add_process_starts(count as u64);
        info!(
            project,
            activated,
            elapsed_ms = self.clock().now().duration_since(started).as_millis() as u64,
            "worker batch ready"
        );
    }

    /// Detached variant of [`Engine::start_new_process_wait`].
    pub fn start_new_process_detached(&self, count: u32, project: String, exchange: bool) {
        let Some(engine) = self.strong() else { return };
        tokio::spawn(async move {
            engine.start_new_process_wait(count, &project, exchange).await;
        });
    }

    /// Spawn one worker and run it through warm-up.
    async fn spawn_and_warm(&self, settings: &ProjectSettings) {
        let (socket_name, listener) = match self.sockets().bind_next() {
            Ok(bound) => bound,
            Err(error) => {
                warn!(project = %settings.name, %error, "cannot allocate worker socket");
                return;
            }
        };

        let pid = match self.adapter().spawn(settings, listener) {
            Ok(pid) => pid,
            Err(error) => {
                warn!(project = %settings.name, %error, "spawn failed");
                let _ = self.registry().inc_crashes(&settings.name);
                return;
            }
        };
        info!(project = %settings.name, %pid, socket = %socket_name, "spawned worker");

        let now = self.clock().now();
        if let Err(error) = self.registry().add_worker(pid, &settings.name, socket_name.clone(), now)
        {
            warn!(%pid, %error, "cannot register worker");
            return;
        }
        let _ = self.registry().set_state(pid, WorkerState::Init, now);

        match warmup::run_warmup(&socket_name, settings).await {
            Ok(()) if self.adapter().alive(pid) => {
                let _ = self.registry().set_state(pid, WorkerState::Idle, self.clock().now());
                info!(project = %settings.name, %pid, "worker warm-up done");
            }
            Ok(()) => {
                // EOF arrived but the process is gone: it died during
                // init. The exit report decides on a replacement and
                // routes the pid to the shutdown queue.
                warn!(project = %settings.name, %pid, "worker exited during warm-up");
                let _ = self.registry().inc_crashes(&settings.name);
            }
            Err(error) => {
                warn!(project = %settings.name, %pid, %error, "warm-up failed");
                let _ = self.registry().inc_crashes(&settings.name);
                if self.adapter().alive(pid) {
                    // Still running but unusable (hung or broken socket):
                    // retire it
                    let _ = self.registry().move_worker_to_shutdown(pid);
                    self.shutdown_signal().notify_change();
                }
            }
        }
    }

    /// A child exit was reported. Replace the worker unless the project
    /// crashed too often; either way route the dead pid through the
    /// shutdown queue for purging.
    ///
    /// The crash counter records startup failures only: a death during
    /// warm-up was already counted by the spawner, a death in normal
    /// operation counts as one prospective failure for the freeze test
    /// without being recorded.
    pub fn handle_worker_exited(&self, pid: WorkerPid) {
        let Ok(list) = self.registry().worker_list(pid) else {
            // Already purged
            return;
        };

        if !self.is_shutting_down() && list != fcp_core::WorkerList::Shutdown {
            if let Ok(project) = self.registry().worker_project(pid) {
                let crashes = self.registry().crashes(&project).unwrap_or(0);
                let died_during_init = matches!(
                    self.registry().worker_state(pid),
                    Ok(WorkerState::Start | WorkerState::Init)
                );
                let with_this_crash = if died_during_init { crashes } else { crashes + 1 };
                if with_this_crash < MAX_CRASHES {
                    info!(%pid, project = %project, "worker died, starting replacement");
                    self.start_new_process_detached(1, project, false);
                } else {
                    warn!(
                        %pid,
                        project = %project,
                        crashes,
                        "worker died but respawning is frozen until the configuration changes"
                    );
                }
            } else {
                warn!(%pid, "exited worker has no project");
            }
        }

        let now = self.clock().now();
        let _ = self.registry().move_worker_to_shutdown(pid);
        let _ = self.registry().set_state(pid, WorkerState::Exit, now);
        self.shutdown_signal().notify_change();
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
