// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed settings extracted from the INI document.

use crate::error::ConfigError;
use crate::ini::{IniDocument, IniSection};
use fcp_core::ProjectSettings;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// How many numbered init/env entries a project may carry.
pub const MAX_NUMBERED_KEYS: usize = 128;

/// Global (non-project) configuration.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    /// Bind address; `*` means any.
    pub listen: String,
    pub port: u16,
    /// Drop to this user after chroot.
    pub chuser: Option<String>,
    pub chroot: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    /// Redirect stdout/stderr (the log) to this file.
    pub logfile: Option<PathBuf>,
    pub debuglevel: u8,
    /// TERM -> KILL escalation interval in the shutdown queue.
    pub term_timeout: Duration,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        GlobalSettings {
            listen: "*".to_string(),
            port: 10177,
            chuser: None,
            chroot: None,
            pidfile: None,
            logfile: None,
            debuglevel: 0,
            term_timeout: Duration::from_secs(10),
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    section: &IniSection,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match section.get(key) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            section: section.name.clone(),
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

pub(crate) fn global_settings(doc: &IniDocument) -> Result<GlobalSettings, ConfigError> {
    let section = doc.global();
    let mut settings = GlobalSettings::default();
    if let Some(listen) = section.get("listen") {
        settings.listen = listen.to_string();
    }
    if let Some(port) = parse_number::<u16>(section, "port")? {
        settings.port = port;
    }
    settings.chuser = section.get("chuser").map(str::to_string);
    settings.chroot = section.get("chroot").map(PathBuf::from);
    settings.pidfile = section.get("pidfile").map(PathBuf::from);
    settings.logfile = section.get("logfile").map(PathBuf::from);
    if let Some(level) = parse_number::<u8>(section, "debuglevel")? {
        settings.debuglevel = level;
    }
    if let Some(secs) = parse_number::<u64>(section, "term_timeout")? {
        settings.term_timeout = Duration::from_secs(secs);
    }
    Ok(settings)
}

/// Numbered key/value list: `initkey0`/`initvalue0`, `envkey1`/... The
/// list stops at the first missing index.
fn numbered_pairs(section: &IniSection, key_prefix: &str, value_prefix: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for i in 0..MAX_NUMBERED_KEYS {
        let Some(key) = section.get(&format!("{key_prefix}{i}")) else { break };
        let Some(value) = section.get(&format!("{value_prefix}{i}")) else { break };
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}

pub(crate) fn project_settings(section: &IniSection) -> Result<ProjectSettings, ConfigError> {
    let mut project = ProjectSettings::named(&section.name);

    match section.get("process") {
        Some(path) if !path.is_empty() => project.command = Some(PathBuf::from(path)),
        _ => {
            // Project is kept but never scaled; its requests get OVERLOADED
            warn!(project = %section.name, "no process path configured");
        }
    }
    if let Some(args) = section.get("process_args") {
        project.args = args.split_whitespace().map(str::to_string).collect();
    }
    if let Some(min) = parse_number::<u32>(section, "min_proc")? {
        project.min_proc = min;
    }
    if let Some(max) = parse_number::<u32>(section, "max_proc")? {
        project.max_proc = max;
    }
    project.scan_param = section.get("scan_param").map(str::to_string);
    if let Some(pattern) = section.get("scan_regex") {
        match Regex::new(pattern) {
            Ok(regex) => project.scan_regex = Some(regex),
            Err(error) => {
                // Same policy as a missing process path: keep the project,
                // match nothing
                warn!(project = %section.name, %error, "invalid scan_regex");
            }
        }
    }
    if let Some(cwd) = section.get("cwd") {
        project.cwd = PathBuf::from(cwd);
    }
    project.config_file = section.get("config_file").map(PathBuf::from);
    if let Some(secs) = parse_number::<u64>(section, "read_timeout")? {
        project.read_timeout = Duration::from_secs(secs);
    }
    project.init_params = numbered_pairs(section, "initkey", "initvalue");
    project.env = numbered_pairs(section, "envkey", "envvalue");
    Ok(project)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
