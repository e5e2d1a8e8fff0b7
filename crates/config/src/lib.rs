// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fcp-config: INI configuration for the scheduler.
//!
//! One global section plus a section per project. A global `include` key
//! names a glob of further INI files whose project sections are merged in
//! (their global keys are ignored). Project match regexes are compiled
//! here, once, at load time.

pub mod error;
pub mod ini;
pub mod settings;

pub use error::ConfigError;
pub use settings::GlobalSettings;

use fcp_core::ProjectSettings;
use ini::IniDocument;
use std::path::Path;
use tracing::warn;

/// The fully loaded configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub global: GlobalSettings,
    /// Projects in configured order; matching walks this order.
    pub projects: Vec<ProjectSettings>,
}

impl SchedulerConfig {
    /// Load the configuration file plus its includes.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut doc = read_document(path)?;

        if let Some(pattern) = doc.global().get("include").map(str::to_string) {
            let paths = glob::glob(&pattern).map_err(|source| ConfigError::BadIncludePattern {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in paths {
                match entry {
                    Ok(include_path) if include_path.is_file() => {
                        let included = read_document(&include_path)?;
                        doc.merge_sections(included);
                    }
                    Ok(include_path) => {
                        warn!(path = %include_path.display(), "included path is not a regular file");
                    }
                    Err(error) => {
                        warn!(%error, pattern = %pattern, "error while expanding include glob");
                    }
                }
            }
        }

        let global = settings::global_settings(&doc)?;
        let mut projects = Vec::with_capacity(doc.sections().len());
        for section in doc.sections() {
            projects.push(settings::project_settings(section)?);
        }
        Ok(SchedulerConfig { global, projects })
    }

    pub fn project(&self, name: &str) -> Option<&ProjectSettings> {
        self.projects.iter().find(|p| p.name == name)
    }
}

fn read_document(path: &Path) -> Result<IniDocument, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    IniDocument::parse(&text)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Project-set difference between two loaded configurations, by section
/// name. Drives reconcile on startup and SIGHUP.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigDelta {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compare old and new project lists.
pub fn diff_projects(old: &[ProjectSettings], new: &[ProjectSettings]) -> ConfigDelta {
    let mut delta = ConfigDelta::default();
    for project in new {
        match old.iter().find(|p| p.name == project.name) {
            None => delta.added.push(project.name.clone()),
            Some(previous) if !previous.same_as(project) => delta.changed.push(project.name.clone()),
            Some(_) => {}
        }
    }
    for project in old {
        if !new.iter().any(|p| p.name == project.name) {
            delta.removed.push(project.name.clone());
        }
    }
    delta
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
