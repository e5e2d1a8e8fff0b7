// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler engine.
//!
//! One [`Engine`] owns the registry, the process adapter, and the control
//! channel. The main loop multiplexes the listening TCP socket against
//! control events; each accepted connection runs as its own dispatcher
//! task, the shutdown queue drains as one long-lived task.

mod adapter;
mod dispatch;
mod events;
mod manager;
mod pool;
mod shutdown_queue;
mod socket;
mod warmup;
mod watcher;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use adapter::{KillOutcome, KillSignal, ProcessAdapter, SpawnError, UnixProcessAdapter};
pub use events::{spawn_signal_listeners, ControlEvent};
pub use socket::SocketPool;
pub use watcher::ConfigWatcher;

use fcp_config::SchedulerConfig;
use fcp_core::{Clock, Registry, Stats};
use shutdown_queue::ShutdownSignal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Engine tunables; the defaults are the documented protocol values.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// TERM -> KILL (and KILL -> abandon) escalation interval.
    pub term_timeout: Duration,
    /// Admission retries before answering OVERLOADED.
    pub max_wait: u32,
    /// Sleep between admission retries.
    pub admission_delay: Duration,
    /// Configuration path for SIGHUP reloads.
    pub config_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            term_timeout: Duration::from_secs(10),
            max_wait: 5,
            admission_delay: Duration::from_secs(1),
            config_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("accept on listening socket failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("control channel closed")]
    ControlChannelClosed,
}

/// Everything long-lived, shared by dispatchers and background tasks.
pub struct Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    registry: Registry,
    stats: Stats,
    adapter: P,
    clock: C,
    sockets: SocketPool,
    shutdown: ShutdownSignal,
    events: UnboundedSender<ControlEvent>,
    cancel: CancellationToken,
    options: EngineOptions,
    shutting_down: AtomicBool,
    watcher: Option<ConfigWatcher>,
    /// Back-reference to the owning Arc, for handing clones to spawned
    /// tasks from `&self` methods.
    weak: Weak<Self>,
}

impl<P, C> Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    pub fn new(
        adapter: P,
        clock: C,
        events: UnboundedSender<ControlEvent>,
        watcher: Option<ConfigWatcher>,
        options: EngineOptions,
    ) -> Arc<Self> {
        let stats = Stats::new(clock.now());
        Arc::new_cyclic(|weak| Engine {
            registry: Registry::new(),
            stats,
            adapter,
            clock,
            sockets: SocketPool::new(),
            shutdown: ShutdownSignal::new(),
            events,
            cancel: CancellationToken::new(),
            options,
            shutting_down: AtomicBool::new(false),
            watcher,
            weak: weak.clone(),
        })
    }

    /// Owned handle for spawned tasks; `None` only while the engine is
    /// being torn down.
    pub(crate) fn strong(&self) -> Option<Arc<Self>> {
        self.weak.upgrade()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn adapter(&self) -> &P {
        &self.adapter
    }

    pub(crate) fn clock(&self) -> &C {
        &self.clock
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub(crate) fn sockets(&self) -> &SocketPool {
        &self.sockets
    }

    pub(crate) fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn events(&self) -> &UnboundedSender<ControlEvent> {
        &self.events
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Serve until terminated and drained.
    ///
    /// `initial` is the already-loaded configuration; its projects are
    /// reconciled (watched and started) before the first accept.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        mut control: UnboundedReceiver<ControlEvent>,
        initial: &SchedulerConfig,
    ) -> Result<(), EngineError> {
        let drainer = tokio::spawn(Arc::clone(&self).run_shutdown_queue());

        self.reconcile(&initial.projects).await;
        info!("initialization done, waiting for connection requests");

        loop {
            tokio::select! {
                accepted = listener.accept(), if !self.is_shutting_down() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(Arc::clone(&self).handle_connection(stream, peer));
                        }
                        // Errors on the long-lived listener are fatal
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            return Err(EngineError::Accept(e));
                        }
                    }
                }
                event = control.recv() => {
                    let Some(event) = event else {
                        return Err(EngineError::ControlChannelClosed);
                    };
                    if self.handle_control_event(event).await {
                        break;
                    }
                }
            }
        }

        if let Err(error) = drainer.await {
            warn!(%error, "shutdown drainer task failed");
        }
        Ok(())
    }

    /// Process one control event; returns true when the main loop should
    /// exit (shutdown fully drained).
    pub async fn handle_control_event(&self, event: ControlEvent) -> bool {
        match event {
            ControlEvent::WorkerExited { pid } => self.handle_worker_exited(pid),
            ControlEvent::ConfigChanged { project } => self.handle_config_changed(&project),
            ControlEvent::ReloadConfig => self.reload_config().await,
            ControlEvent::LogStats => {
                info!("statistics: {}", self.stats.summary(self.clock.now()));
            }
            ControlEvent::DumpRegistry => {
                info!("process registry:\n{}", self.registry.dump());
            }
            ControlEvent::Terminate => self.begin_shutdown(),
            ControlEvent::ShutdownDrained => {
                info!("shutdown queue drained");
                return true;
            }
        }
        false
    }

    /// First termination signal: stop accepting, retire every worker, ask
    /// the queue to drain. A second one exits immediately, like the
    /// original's restored default handlers.
    fn begin_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("second termination signal, exiting immediately");
            std::process::exit(2);
        }
        info!("termination signal received, retiring all workers");
        self.cancel.cancel();
        self.shutdown_all_projects();
        self.shutdown.request_drain();
    }

    async fn reload_config(&self) {
        let Some(path) = self.options.config_path.clone() else {
            warn!("no configuration path, ignoring reload request");
            return;
        };
        info!(path = %path.display(), "reloading configuration");
        match SchedulerConfig::load(&path) {
            Ok(config) => self.reconcile(&config.projects).await,
            // A broken file keeps the running configuration
            Err(error) => error!(%error, "configuration reload failed, keeping current projects"),
        }
    }

    /// Cancellation token observed by in-flight dispatchers.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn watcher(&self) -> Option<&ConfigWatcher> {
        self.watcher.as_ref()
    }
}
