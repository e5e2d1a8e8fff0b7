// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch specs: matching, admission, and the splice itself.

use super::prelude::*;
use fcp_core::WorkerState;
use fcp_daemon::engine::test_support::WorkerBehavior;
use fcp_fcgi::ProtocolStatus;
use serial_test::serial;
use std::time::Duration;

/// A matched request is spliced to a worker and the byte stream comes
/// back; afterwards the worker is idle again.
#[tokio::test]
#[serial]
async fn happy_path_round_trip() {
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")]).start().await;

    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(response.stdout, b"OK");
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::RequestComplete));

    let registry = scheduler.engine.registry();
    let back_to_idle = wait_until(Duration::from_secs(2), || {
        registry.count_states("maps", &[WorkerState::Idle]) == 1
    })
    .await;
    assert!(back_to_idle, "worker returns to the idle pool");
    assert_eq!(registry.active_count("maps"), 1);
    assert_eq!(scheduler.engine.stats().connections(), 1);

    scheduler.stop().await;
}

/// A request matching no project is answered OVERLOADED and no worker is
/// taken.
#[tokio::test]
#[serial]
async fn unmatched_request_is_overloaded() {
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")]).start().await;

    let response = fcgi_request(scheduler.addr, "map=bar").await;
    assert!(response.stdout.is_empty());
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::Overloaded));

    let registry = scheduler.engine.registry();
    assert_eq!(registry.count_states("maps", &[WorkerState::Busy]), 0);

    scheduler.stop().await;
}

/// With one worker and max_proc=1, an overlapping request waits for the
/// first to release and then completes.
#[tokio::test]
#[serial]
async fn admission_wait_succeeds_when_worker_frees_up() {
    let mut single = project("maps", "^map=foo$");
    single.max_proc = 1;
    let scheduler = SchedulerBuilder::new(vec![single])
        .behavior("maps", WorkerBehavior::slow(Duration::from_millis(300)))
        .start()
        .await;

    let first = tokio::spawn(fcgi_request(scheduler.addr, "map=foo"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = tokio::spawn(fcgi_request(scheduler.addr, "map=foo"));

    let first = first.await.expect("first request");
    let second = second.await.expect("second request");
    assert_eq!(first.protocol_status(), Some(ProtocolStatus::RequestComplete));
    assert_eq!(second.protocol_status(), Some(ProtocolStatus::RequestComplete));

    // One worker served both; admission never started a second one
    assert_eq!(scheduler.adapter.spawned_count(), 1);

    scheduler.stop().await;
}

/// When the only worker stays busy past every retry, the second request
/// is answered OVERLOADED.
#[tokio::test]
#[serial]
async fn admission_wait_fails_on_a_stalled_worker() {
    let mut single = project("maps", "^map=foo$");
    single.max_proc = 1;
    let mut options = spec_options();
    options.max_wait = 2;
    options.admission_delay = Duration::from_millis(50);

    let scheduler = SchedulerBuilder::new(vec![single])
        .options(options)
        .behavior("maps", WorkerBehavior::slow(Duration::from_secs(1)))
        .start()
        .await;

    let first = tokio::spawn(fcgi_request(scheduler.addr, "map=foo"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(second.protocol_status(), Some(ProtocolStatus::Overloaded));

    let first = first.await.expect("first request");
    assert_eq!(first.protocol_status(), Some(ProtocolStatus::RequestComplete));

    scheduler.stop().await;
}

/// Bytes cross the splice unaltered even when the response spans many
/// transfer-buffer fills.
#[tokio::test]
#[serial]
async fn large_response_crosses_the_splice_intact() {
    let body: Vec<u8> = (0..32_000u32).map(|i| (i % 251) as u8).collect();
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")])
        .behavior(
            "maps",
            WorkerBehavior::Respond { body: body.clone(), delay: Duration::ZERO },
        )
        .start()
        .await;

    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(response.stdout.len(), body.len());
    assert_eq!(response.stdout, body);
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::RequestComplete));

    scheduler.stop().await;
}

/// Requests route to the first configured project whose regex matches.
#[tokio::test]
#[serial]
async fn requests_route_by_configured_order() {
    let scheduler = SchedulerBuilder::new(vec![
        project("foo", "^map=foo$"),
        project("any", "^map="),
    ])
    .start()
    .await;

    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::RequestComplete));

    let registry = scheduler.engine.registry();
    let released = wait_until(Duration::from_secs(2), || {
        registry.count_states("foo", &[WorkerState::Busy]) == 0
    })
    .await;
    assert!(released);
    // The broader 'any' project was never touched
    assert_eq!(scheduler.engine.stats().connections(), 1);

    let other = fcgi_request(scheduler.addr, "map=elsewhere").await;
    assert_eq!(other.protocol_status(), Some(ProtocolStatus::RequestComplete));

    scheduler.stop().await;
}
