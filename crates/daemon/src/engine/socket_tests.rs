// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for abstract socket allocation.

use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[test]
fn bind_next_yields_distinct_names() {
    let pool = SocketPool::with_prefix("fcp-test-distinct");
    let (first, _l1) = pool.bind_next().unwrap();
    let (second, _l2) = pool.bind_next().unwrap();
    assert_ne!(first, second);
    assert!(first.starts_with("fcp-test-distinct-"));
}

#[test]
fn bind_next_skips_taken_names() {
    let taken = SocketPool::with_prefix("fcp-test-taken");
    let (name, _keep) = taken.bind_next().unwrap();
    assert_eq!(name, "fcp-test-taken-0");

    // A second pool with the same prefix collides on -0 and retries
    let other = SocketPool::with_prefix("fcp-test-taken");
    let (next, _l) = other.bind_next().unwrap();
    assert_eq!(next, "fcp-test-taken-1");
}

#[tokio::test]
async fn connect_reaches_a_bound_listener() {
    let pool = SocketPool::with_prefix("fcp-test-connect");
    let (name, listener) = pool.bind_next().unwrap();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::UnixListener::from_std(listener).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(&buf).await.unwrap();
    });

    let mut stream = connect_abstract(&name).await.unwrap();
    stream.write_all(b"hello").await.unwrap();
    let mut echo = [0u8; 5];
    stream.read_exact(&mut echo).await.unwrap();
    assert_eq!(&echo, b"hello");
    server.await.unwrap();
}

#[tokio::test]
async fn connect_to_unbound_name_fails() {
    assert!(connect_abstract("fcp-test-nobody-home-77").await.is_err());
}
