// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: logging, resource limits, privilege drop, detach,
//! pidfile.

mod startup;

pub use startup::{
    bind_listener, check_resource_limits, detach, drop_privileges, inherited_listener,
    init_logging, write_pidfile, PidFile, DAEMONIZED_ENV,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot bind to {listen}:{port}: {source}")]
    Bind {
        listen: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve listen address '{0}'")]
    Resolve(String),

    #[error("cannot open log file '{path}': {source}")]
    LogFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot query or raise the open-file limit: {0}")]
    ResourceLimit(#[source] std::io::Error),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("cannot drop privileges: {0}")]
    PrivilegeDrop(#[source] std::io::Error),

    #[error("cannot write pidfile '{path}': {source}")]
    PidFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot detach into the background: {0}")]
    Detach(#[source] std::io::Error),
}
