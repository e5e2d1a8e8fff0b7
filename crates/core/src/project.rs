// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project settings: a named class of identical workers.

use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration of one project, immutable once loaded.
///
/// `command` and `scan_regex` are optional on purpose: a project with a
/// missing executable or an invalid regex is kept but never scaled or
/// matched, so its requests answer OVERLOADED (config errors are not
/// fatal to the scheduler).
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    /// Section name from the configuration file.
    pub name: String,
    /// Worker executable.
    pub command: Option<PathBuf>,
    /// Extra arguments for the worker executable.
    pub args: Vec<String>,
    /// Working directory of the worker.
    pub cwd: PathBuf,
    /// Environment overlay applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// FastCGI parameters sent during warm-up.
    pub init_params: Vec<(String, String)>,
    /// FastCGI parameter name inspected for project matching.
    pub scan_param: Option<String>,
    /// Compiled match regex run against the `scan_param` value.
    pub scan_regex: Option<Regex>,
    /// Idle workers to keep available.
    pub min_proc: u32,
    /// Upper bound of workers for this project.
    pub max_proc: u32,
    /// Config file recycling the pool when it changes.
    pub config_file: Option<PathBuf>,
    /// Warm-up read timeout.
    pub read_timeout: Duration,
}

impl ProjectSettings {
    /// Minimal settings for a named project; used by tests and as the
    /// base the config loader fills in.
    pub fn named(name: impl Into<String>) -> Self {
        ProjectSettings {
            name: name.into(),
            command: None,
            args: Vec::new(),
            cwd: PathBuf::from("/"),
            env: Vec::new(),
            init_params: Vec::new(),
            scan_param: None,
            scan_regex: None,
            min_proc: 1,
            max_proc: 20,
            config_file: None,
            read_timeout: Duration::from_secs(60),
        }
    }

    /// Whether workers can be started for this project at all.
    pub fn is_launchable(&self) -> bool {
        self.command.is_some()
    }

    /// Run the project's match regex against a parameter value.
    pub fn matches(&self, value: &str) -> bool {
        match &self.scan_regex {
            Some(regex) => regex.is_match(value),
            None => false,
        }
    }

    /// Field-wise equality; regexes compare by pattern. Used by the
    /// reload diff to decide whether a project needs recycling.
    pub fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.command == other.command
            && self.args == other.args
            && self.cwd == other.cwd
            && self.env == other.env
            && self.init_params == other.init_params
            && self.scan_param == other.scan_param
            && self.scan_regex.as_ref().map(|r| r.as_str())
                == other.scan_regex.as_ref().map(|r| r.as_str())
            && self.min_proc == other.min_proc
            && self.max_proc == other.max_proc
            && self.config_file == other.config_file
            && self.read_timeout == other.read_timeout
    }
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
