// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project management: reconcile configuration with running pools.

use super::adapter::ProcessAdapter;
use super::Engine;
use fcp_config::diff_projects;
use fcp_core::{Clock, ProjectSettings};
use tokio::task::JoinSet;
use tracing::{info, warn};

impl<P, C> Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    /// Bring the running pools in line with a loaded project set.
    ///
    /// New projects are watched and started (blocking until their
    /// warm-ups finish); changed projects are recycled; removed projects
    /// are shut down. Used both for initial startup (against an empty
    /// registry) and SIGHUP reloads.
    pub async fn reconcile(&self, projects: &[ProjectSettings]) {
        let delta = diff_projects(&self.registry().projects(), projects);

        for project in projects {
            self.registry().upsert_project(project.clone());
        }

        let mut starts = JoinSet::new();
        for name in &delta.added {
            let Some(project) = projects.iter().find(|p| &p.name == name) else { continue };
            let Some(engine) = self.strong() else { return };
            info!(project = %name, "new project");
            self.watch_project_config(project);

            let name = name.clone();
            let min_proc = project.min_proc;
            starts.spawn(async move {
                engine.start_new_process_wait(min_proc, &name, false).await;
            });
        }
        while starts.join_next().await.is_some() {}

        for name in &delta.changed {
            info!(project = %name, "project configuration changed, recycling");
            if let Some(project) = projects.iter().find(|p| &p.name == name) {
                self.watch_project_config(project);
            }
            self.recycle_project(name);
        }

        for name in &delta.removed {
            info!(project = %name, "project removed from configuration");
            self.shutdown_project(name);
            if let Some(watcher) = self.watcher() {
                watcher.unwatch_project(name);
            }
            let _ = self.registry().remove_project(name);
        }
    }

    fn watch_project_config(&self, project: &ProjectSettings) {
        let Some(watcher) = self.watcher() else { return };
        let Some(config_file) = &project.config_file else { return };
        if let Err(error) = watcher.watch_project(&project.name, config_file) {
            warn!(project = %project.name, %error, "cannot watch project config file");
        }
    }

    /// Replace a project's pool: start as many fresh workers as the pool
    /// currently serves with (at least `min_proc`), then exchange them
    /// for the current ACTIVE list. Detached.
    pub fn recycle_project(&self, name: &str) {
        let Ok(settings) = self.registry().project(name) else {
            warn!(project = %name, "recycle requested for unknown project");
            return;
        };
        // A pool that scaled above min_proc keeps its capacity across
        // the exchange
        let count = settings.min_proc.max(self.registry().active_count(name) as u32);
        self.start_new_process_detached(count, name.to_string(), true);
    }

    /// A watched config file was replaced: recycle and reset the crash
    /// counter (the reset happens with the exchange).
    pub(crate) fn handle_config_changed(&self, project: &str) {
        if self.registry().project(project).is_err() {
            warn!(project, "config change for unknown project ignored");
            return;
        }
        info!(project, "project config file changed, restarting workers");
        self.recycle_project(project);
    }

    /// Retire both lists of one project.
    pub fn shutdown_project(&self, name: &str) {
        let init = self.registry().move_init_to_shutdown(name);
        let active = self.registry().move_active_to_shutdown(name);
        if !init.is_empty() || !active.is_empty() {
            info!(project = %name, init = init.len(), active = active.len(), "retiring workers");
            self.shutdown_signal().notify_change();
        }
    }

    /// Retire every worker of every project (global shutdown).
    pub fn shutdown_all_projects(&self) {
        let moved = self.registry().move_all_to_shutdown();
        info!(count = moved.len(), "moved all workers to shutdown");
        self.shutdown_signal().notify_change();
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
