// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash handling and config-driven pool recycling specs.

use super::prelude::*;
use fcp_daemon::engine::test_support::WorkerBehavior;
use fcp_fcgi::ProtocolStatus;
use serial_test::serial;
use std::time::Duration;

/// A worker crashing during warm-up bumps the crash counter and is
/// replaced; after five consecutive crashes the project freezes.
#[tokio::test]
#[serial]
async fn warmup_crashes_are_counted_and_eventually_freeze() {
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")])
        .behavior("maps", WorkerBehavior::DieOnConnect)
        .no_ready_wait()
        .start()
        .await;

    let registry = scheduler.engine.registry();
    // The main loop pumps exit reports, so the respawn chain runs on its
    // own until the freeze
    let frozen = wait_until(Duration::from_secs(5), || {
        registry.crashes("maps") == Ok(5)
    })
    .await;
    assert!(frozen, "crash counter should reach the freeze limit");

    // One initial spawn plus four replacements, then nothing more
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scheduler.adapter.spawned_count(), 5);
    assert_eq!(registry.active_count("maps"), 0);

    // Requests for the frozen project are answered OVERLOADED
    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::Overloaded));

    scheduler.stop().await;
}

/// Replacing a watched config file recycles the pool: fresh workers take
/// over, the old ones are retired, the crash counter resets.
#[tokio::test]
#[serial]
async fn config_file_replacement_recycles_the_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_file = dir.path().join("maps.conf");
    std::fs::write(&config_file, "generation = 1\n").expect("write config");

    let mut maps = project("maps", "^map=foo$");
    maps.config_file = Some(config_file.clone());

    let scheduler = SchedulerBuilder::new(vec![maps]).with_watcher().start().await;
    let registry = scheduler.engine.registry();

    let old_pid = registry.acquire_idle("maps").expect("warm worker");
    registry
        .set_state(old_pid, fcp_core::WorkerState::Idle, std::time::Instant::now())
        .expect("release");
    registry.inc_crashes("maps").expect("count a crash");

    // Rename a new file over the watched path (atomic replacement)
    let staged = dir.path().join("maps.conf.next");
    std::fs::write(&staged, "generation = 2\n").expect("write staged");
    std::fs::rename(&staged, &config_file).expect("rename into place");

    // The recycle exchanges the pool and resets the counter; the retired
    // worker is killed and purged by the shutdown queue
    let recycled = wait_until(Duration::from_secs(5), || {
        registry.crashes("maps") == Ok(0)
            && registry.active_count("maps") == 1
            && registry.worker_state(old_pid).is_err()
    })
    .await;
    assert!(recycled, "pool should be exchanged after the config change");

    // The fresh pool serves requests
    let response = fcgi_request(scheduler.addr, "map=foo").await;
    assert_eq!(response.protocol_status(), Some(ProtocolStatus::RequestComplete));

    scheduler.stop().await;
}

/// A pool that scaled above min_proc keeps its capacity across a
/// config-driven recycle: the exchange starts as many fresh workers as
/// were actively serving.
#[tokio::test]
#[serial]
async fn recycle_preserves_a_scaled_up_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_file = dir.path().join("maps.conf");
    std::fs::write(&config_file, "generation = 1\n").expect("write config");

    let mut maps = project("maps", "^map=foo$");
    maps.config_file = Some(config_file.clone());

    let scheduler = SchedulerBuilder::new(vec![maps]).with_watcher().start().await;
    let registry = scheduler.engine.registry();

    // Grow the pool past min_proc, as admission would under load
    scheduler.engine.start_new_process_wait(2, "maps", false).await;
    assert_eq!(registry.active_count("maps"), 3);

    let staged = dir.path().join("maps.conf.next");
    std::fs::write(&staged, "generation = 2\n").expect("write staged");
    std::fs::rename(&staged, &config_file).expect("rename into place");

    // Three fresh workers come up and the three old ones are retired and
    // purged by the shutdown queue
    let recycled = wait_until(Duration::from_secs(5), || {
        scheduler.adapter.spawned_count() == 6
            && registry.active_count("maps") == 3
            && registry.worker_count() == 3
    })
    .await;
    assert!(recycled, "the exchange should match the pool's serving capacity");

    scheduler.stop().await;
}

/// A worker dying mid-operation is replaced as long as the project has
/// not crossed the crash limit.
#[tokio::test]
#[serial]
async fn runtime_crash_respawns_a_worker() {
    let scheduler = SchedulerBuilder::new(vec![project("maps", "^map=foo$")]).start().await;
    let registry = scheduler.engine.registry();

    let victim = registry.acquire_idle("maps").expect("worker");
    use fcp_daemon::engine::{KillSignal, ProcessAdapter};
    scheduler.adapter.kill(victim, KillSignal::Kill).expect("kill");

    let replaced = wait_until(Duration::from_secs(5), || {
        registry.active_count("maps") == 1 && registry.worker_state(victim).is_err()
    })
    .await;
    assert!(replaced, "a replacement worker should be activated");
    assert_eq!(registry.crashes("maps"), Ok(0));

    scheduler.stop().await;
}
