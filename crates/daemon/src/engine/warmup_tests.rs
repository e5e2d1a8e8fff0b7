// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for the warm-up protocol.

use super::*;
use crate::engine::SocketPool;
use fcp_core::ProjectSettings;
use fcp_fcgi::{RecordType, Session, SessionState};
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn project_with_params() -> ProjectSettings {
    let mut project = ProjectSettings::named("maps");
    project.init_params = vec![
        ("QUERY_STRING".to_string(), "map=warmup".to_string()),
        ("REQUEST_METHOD".to_string(), "GET".to_string()),
    ];
    project.read_timeout = Duration::from_millis(500);
    project
}

#[test]
fn warmup_request_carries_init_params_and_terminators() {
    let bytes = warmup_request(&project_with_params());

    let mut session = Session::new();
    session.feed(&bytes);
    assert_eq!(session.state(), SessionState::ParamsDone);
    assert_eq!(session.request_id(), Some(1));
    assert_eq!(session.param("QUERY_STRING"), Some("map=warmup"));
    assert_eq!(session.param("REQUEST_METHOD"), Some("GET"));

    // Two empty STDIN records close the stream
    let mut stdin_terminators = 0;
    let mut offset = 0;
    while offset < bytes.len() {
        let mut message = fcp_fcgi::Message::new();
        offset += message.feed(&bytes[offset..]).unwrap();
        assert!(message.is_done());
        if message.rtype() == Some(RecordType::Stdin) && message.body().is_empty() {
            stdin_terminators += 1;
        }
    }
    assert_eq!(stdin_terminators, 2);
}

#[tokio::test]
async fn warmup_succeeds_when_worker_replies_and_closes() {
    let pool = SocketPool::with_prefix("fcp-test-warmok");
    let (name, listener) = pool.bind_next().unwrap();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::UnixListener::from_std(listener).unwrap();

    let worker = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut scratch = [0u8; 1024];
        // Read the whole request, emit a token response, close
        let _ = stream.read(&mut scratch).await.unwrap();
        use tokio::io::AsyncWriteExt;
        stream.write_all(b"warm").await.unwrap();
    });

    run_warmup(&name, &project_with_params()).await.unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn warmup_times_out_on_a_silent_worker() {
    let pool = SocketPool::with_prefix("fcp-test-warmhang");
    let (name, listener) = pool.bind_next().unwrap();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::UnixListener::from_std(listener).unwrap();

    let worker = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Hold the connection open without answering
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let mut project = project_with_params();
    project.read_timeout = Duration::from_millis(50);
    let error = run_warmup(&name, &project).await.unwrap_err();
    assert!(matches!(error, WarmupError::Timeout));
    worker.abort();
}

#[tokio::test]
async fn warmup_fails_when_nothing_listens() {
    let error = run_warmup("fcp-test-warmup-nobody", &project_with_params()).await.unwrap_err();
    assert!(matches!(error, WarmupError::Connect { .. }));
}
