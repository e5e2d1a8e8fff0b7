// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control events consumed by the engine's main loop.
//!
//! Signal handlers do no work themselves: small tasks forward each signal
//! onto the control channel, and everything is processed in arrival order
//! on the main loop (the async rendition of the original self-pipe).

use fcp_core::WorkerPid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::UnboundedSender;

/// One event on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// A worker child process exited (reported by its monitor task).
    WorkerExited { pid: WorkerPid },
    /// A project's watched config file was replaced.
    ConfigChanged { project: String },
    /// SIGHUP: reload the configuration file and reconcile.
    ReloadConfig,
    /// SIGUSR1: write the statistics summary to the log.
    LogStats,
    /// SIGUSR2: dump the process registry to the log.
    DumpRegistry,
    /// SIGTERM/SIGINT/SIGQUIT: begin global shutdown.
    Terminate,
    /// The shutdown queue finished draining.
    ShutdownDrained,
}

/// Install the signal-forwarding tasks.
pub fn spawn_signal_listeners(events: UnboundedSender<ControlEvent>) -> std::io::Result<()> {
    let forward = [
        (SignalKind::hangup(), ControlEvent::ReloadConfig),
        (SignalKind::user_defined1(), ControlEvent::LogStats),
        (SignalKind::user_defined2(), ControlEvent::DumpRegistry),
        (SignalKind::terminate(), ControlEvent::Terminate),
        (SignalKind::interrupt(), ControlEvent::Terminate),
        (SignalKind::quit(), ControlEvent::Terminate),
    ];
    for (kind, event) in forward {
        let mut stream = signal(kind)?;
        let events = events.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if events.send(event.clone()).is_err() {
                    break;
                }
            }
        });
    }
    Ok(())
}
