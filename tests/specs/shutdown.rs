// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global shutdown specs.

use super::prelude::*;
use fcp_daemon::engine::ControlEvent;
use serial_test::serial;
use std::time::Duration;

/// Termination retires every worker, drains the queue, and exits the main
/// loop cleanly.
#[tokio::test]
#[serial]
async fn terminate_drains_all_pools_and_exits() {
    let scheduler = SchedulerBuilder::new(vec![
        project("alpha", "^map=a$"),
        project("beta", "^map=b$"),
    ])
    .start()
    .await;

    let registry = scheduler.engine.registry();
    assert_eq!(registry.active_count("alpha"), 1);
    assert_eq!(registry.active_count("beta"), 1);

    scheduler.events.send(ControlEvent::Terminate).expect("send terminate");
    let result = tokio::time::timeout(Duration::from_secs(5), scheduler.handle)
        .await
        .expect("engine exits")
        .expect("task joins");
    result.expect("clean shutdown");

    assert_eq!(scheduler.engine.registry().worker_count(), 0, "all workers purged");
}

/// Statistics and registry dumps are served from the control channel
/// without disturbing dispatch.
#[tokio::test]
#[serial]
async fn stats_and_dump_events_are_inert() {
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")]).start().await;

    scheduler.events.send(ControlEvent::LogStats).expect("send stats");
    scheduler.events.send(ControlEvent::DumpRegistry).expect("send dump");

    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(
        response.protocol_status(),
        Some(fcp_fcgi::ProtocolStatus::RequestComplete)
    );

    scheduler.stop().await;
}
