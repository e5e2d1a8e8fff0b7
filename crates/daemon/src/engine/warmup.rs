// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warm-up: the synthetic readiness request for a fresh worker.
//!
//! A new client connection is opened to the worker's socket (the original
//! listener stays with the worker), a minimal RESPONDER request carrying
//! the project's init parameters is sent, and everything the worker emits
//! is read and discarded until EOF. The worker closes the connection when
//! it has finished its first request, so EOF doubles as the readiness
//! signal.

use super::socket;
use fcp_core::ProjectSettings;
use fcp_fcgi::{encode_pair, Message, Role};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

/// Request id used for every warm-up request.
const WARMUP_REQUEST_ID: u16 = 1;

#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("cannot connect to worker socket '{socket}': {source}")]
    Connect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o during warm-up: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timeout expired")]
    Timeout,
}

/// Byte stream of the warm-up request: BEGIN_REQUEST, one PARAMS record
/// with the init parameters, the PARAMS terminator, two STDIN terminators.
pub(crate) fn warmup_request(project: &ProjectSettings) -> Vec<u8> {
    let mut payload = Vec::new();
    for (name, value) in &project.init_params {
        encode_pair(&mut payload, name.as_bytes(), value.as_bytes());
    }

    let mut buf = Vec::new();
    Message::begin_request(WARMUP_REQUEST_ID, Role::Responder, 0).write_to(&mut buf);
    Message::params(WARMUP_REQUEST_ID, &payload).write_to(&mut buf);
    Message::params(WARMUP_REQUEST_ID, b"").write_to(&mut buf);
    Message::stdin(WARMUP_REQUEST_ID, b"").write_to(&mut buf);
    Message::stdin(WARMUP_REQUEST_ID, b"").write_to(&mut buf);
    buf
}

/// Run the warm-up request against `socket_name`.
///
/// Every read must complete within the project's `read_timeout`; expiry
/// marks the worker as failed to start.
pub(crate) async fn run_warmup(
    socket_name: &str,
    project: &ProjectSettings,
) -> Result<(), WarmupError> {
    let mut stream = socket::connect_abstract(socket_name).await.map_err(|source| {
        WarmupError::Connect { socket: socket_name.to_string(), source }
    })?;

    stream.write_all(&warmup_request(project)).await?;

    let mut scratch = [0u8; 4096];
    loop {
        let read = timeout(project.read_timeout, stream.read(&mut scratch))
            .await
            .map_err(|_| WarmupError::Timeout)??;
        if read == 0 {
            return Ok(());
        }
    }
}

#[cfg(test)]
#[path = "warmup_tests.rs"]
mod tests;
