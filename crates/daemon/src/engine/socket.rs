// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstract-namespace rendezvous sockets for workers.
//!
//! Every worker gets its own listening socket with an abstract (no
//! filesystem inode) name built from a monotonically increasing counter.
//! A name already taken surfaces as `EADDRINUSE` and the next counter
//! value is tried; each socket is used for exactly one worker lifetime.

use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::sync::atomic::{AtomicU32, Ordering};

/// Attempts before giving up on finding a free socket name.
const MAX_BIND_ATTEMPTS: u32 = 10_000;

/// Allocates uniquely named abstract listening sockets.
pub struct SocketPool {
    prefix: String,
    next: AtomicU32,
}

impl SocketPool {
    pub fn new() -> Self {
        SocketPool::with_prefix("fcgipool-worker")
    }

    /// A distinct prefix keeps concurrently running instances (tests) out
    /// of each other's namespace.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        SocketPool { prefix: prefix.into(), next: AtomicU32::new(0) }
    }

    /// Bind the next free abstract socket; returns its name and listener.
    pub fn bind_next(&self) -> std::io::Result<(String, UnixListener)> {
        for _ in 0..MAX_BIND_ATTEMPTS {
            let suffix = self.next.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}-{}", self.prefix, suffix);
            let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
            match UnixListener::bind_addr(&addr) {
                Ok(listener) => return Ok((name, listener)),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no free abstract socket name",
        ))
    }
}

impl Default for SocketPool {
    fn default() -> Self {
        SocketPool::new()
    }
}

/// Open a fresh client connection to a worker's abstract socket.
pub async fn connect_abstract(name: &str) -> std::io::Result<tokio::net::UnixStream> {
    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = tokio::task::spawn_blocking(move || UnixStream::connect_addr(&addr))
        .await
        .map_err(std::io::Error::other)??;
    stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(stream)
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
