// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration loading errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: crate::ini::IniError,
    },

    #[error("section '{section}': key '{key}' has invalid value '{value}'")]
    InvalidValue { section: String, key: String, value: String },

    #[error("invalid include pattern '{pattern}': {source}")]
    BadIncludePattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}
