// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake process adapter: in-process workers speaking real FastCGI over
//! real abstract sockets, without forking anything.
//!
//! Each "spawned" worker is a tokio task serving its listener exactly like
//! a single-threaded FastCGI responder: accept a connection, read records
//! until the stdin terminator, answer, close. Behaviors model the failure
//! modes the supervisor has to handle.

use super::adapter::{KillOutcome, KillSignal, ProcessAdapter, SpawnError};
use super::events::ControlEvent;
use super::{Engine, EngineOptions};
use fcp_core::{FakeClock, ProjectSettings, WorkerPid};
use fcp_fcgi::{Message, ProtocolStatus, RecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// How a fake worker behaves once spawned.
#[derive(Debug, Clone)]
pub enum WorkerBehavior {
    /// Serve every request: optional delay, then STDOUT `body` and a
    /// clean END_REQUEST.
    Respond { body: Vec<u8>, delay: Duration },
    /// Exit as soon as the first connection arrives (crash during
    /// warm-up).
    DieOnConnect,
    /// Accept and read but never answer and never close (warm-up
    /// timeout).
    Hang,
}

impl WorkerBehavior {
    pub fn ok() -> Self {
        WorkerBehavior::Respond { body: b"OK".to_vec(), delay: Duration::ZERO }
    }

    pub fn slow(delay: Duration) -> Self {
        WorkerBehavior::Respond { body: b"OK".to_vec(), delay }
    }
}

struct FakeWorker {
    project: String,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
}

struct FakeInner {
    events: UnboundedSender<ControlEvent>,
    next_pid: AtomicI32,
    behaviors: Mutex<HashMap<String, WorkerBehavior>>,
    workers: Mutex<HashMap<WorkerPid, FakeWorker>>,
    /// Projects whose workers ignore signals (uninterruptible processes).
    immortal: Mutex<std::collections::HashSet<String>>,
}

/// Test stand-in for [`super::UnixProcessAdapter`]. Clones share state so
/// a test can keep a handle while the engine owns the adapter.
#[derive(Clone)]
pub struct FakeProcessAdapter {
    inner: Arc<FakeInner>,
}

impl FakeProcessAdapter {
    pub fn new(events: UnboundedSender<ControlEvent>) -> Self {
        FakeProcessAdapter {
            inner: Arc::new(FakeInner {
                events,
                next_pid: AtomicI32::new(50_000),
                behaviors: Mutex::new(HashMap::new()),
                workers: Mutex::new(HashMap::new()),
                immortal: Mutex::new(std::collections::HashSet::new()),
            }),
        }
    }

    /// Configure how workers of `project` behave; default is
    /// [`WorkerBehavior::ok`].
    pub fn set_behavior(&self, project: &str, behavior: WorkerBehavior) {
        self.inner.behaviors.lock().insert(project.to_string(), behavior);
    }

    /// Workers of `project` accept signals but never die from them.
    pub fn set_immortal(&self, project: &str) {
        self.inner.immortal.lock().insert(project.to_string());
    }

    pub fn spawned_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    fn mark_dead(&self, pid: WorkerPid) {
        if let Some(worker) = self.inner.workers.lock().get(&pid) {
            if worker.alive.swap(false, Ordering::SeqCst) {
                worker.cancel.cancel();
                let _ = self.inner.events.send(ControlEvent::WorkerExited { pid });
            }
        }
    }
}

impl ProcessAdapter for FakeProcessAdapter {
    fn spawn(
        &self,
        project: &ProjectSettings,
        listener: StdUnixListener,
    ) -> Result<WorkerPid, SpawnError> {
        if project.command.is_none() {
            return Err(SpawnError::NoCommand(project.name.clone()));
        }
        let pid = WorkerPid(self.inner.next_pid.fetch_add(1, Ordering::Relaxed));
        let behavior = self
            .inner
            .behaviors
            .lock()
            .get(&project.name)
            .cloned()
            .unwrap_or_else(WorkerBehavior::ok);

        listener
            .set_nonblocking(true)
            .map_err(|source| SpawnError::Spawn { command: project.name.clone(), source })?;
        let listener = UnixListener::from_std(listener)
            .map_err(|source| SpawnError::Spawn { command: project.name.clone(), source })?;

        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        self.inner.workers.lock().insert(
            pid,
            FakeWorker {
                project: project.name.clone(),
                cancel: cancel.clone(),
                alive: Arc::clone(&alive),
            },
        );

        let events = self.inner.events.clone();
        let task_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            worker_main(listener, behavior, &cancel, &task_alive, &events, pid).await;
            // Exits not already reported (kills report from mark_dead,
            // crashes from worker_main) land here
            report_exit(&events, pid, &task_alive);
        });

        Ok(pid)
    }

    fn kill(&self, pid: WorkerPid, _signal: KillSignal) -> std::io::Result<KillOutcome> {
        let (exists_alive, project) = {
            let workers = self.inner.workers.lock();
            match workers.get(&pid) {
                Some(w) => (w.alive.load(Ordering::SeqCst), w.project.clone()),
                None => (false, String::new()),
            }
        };
        if !exists_alive {
            return Ok(KillOutcome::NoSuchProcess);
        }
        if !self.inner.immortal.lock().contains(&project) {
            self.mark_dead(pid);
        }
        Ok(KillOutcome::Signalled)
    }

    fn alive(&self, pid: WorkerPid) -> bool {
        self.inner
            .workers
            .lock()
            .get(&pid)
            .map(|w| w.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// Engine wired to the fake adapter and a controllable clock, plus the
/// receiving end of the control channel.
pub struct TestHarness {
    pub engine: Arc<Engine<FakeProcessAdapter, FakeClock>>,
    pub adapter: FakeProcessAdapter,
    pub clock: FakeClock,
    pub events: tokio::sync::mpsc::UnboundedReceiver<ControlEvent>,
}

impl TestHarness {
    pub fn new(options: EngineOptions) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let clock = FakeClock::new();
        let adapter = FakeProcessAdapter::new(events_tx.clone());
        let engine = Engine::new(adapter.clone(), clock.clone(), events_tx, None, options);
        TestHarness { engine, adapter, clock, events: events_rx }
    }

    /// Feed every queued control event through the engine, as the main
    /// loop would. Returns how many were processed.
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            let _ = self.engine.handle_control_event(event).await;
            handled += 1;
        }
        handled
    }

    /// A short real-time pause so detached tasks (spawns, monitors) make
    /// progress before assertions.
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Report a worker's exit exactly once.
fn report_exit(events: &UnboundedSender<ControlEvent>, pid: WorkerPid, alive: &AtomicBool) {
    if alive.swap(false, Ordering::SeqCst) {
        let _ = events.send(ControlEvent::WorkerExited { pid });
    }
}

async fn worker_main(
    listener: UnixListener,
    behavior: WorkerBehavior,
    cancel: &CancellationToken,
    alive: &AtomicBool,
    events: &UnboundedSender<ControlEvent>,
    pid: WorkerPid,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let Ok((stream, _)) = accepted else { return };

        match &behavior {
            WorkerBehavior::DieOnConnect => {
                // Simulated crash. Liveness goes false before the peer can
                // observe EOF, like a real exit precedes the socket close.
                report_exit(events, pid, alive);
                drop(stream);
                return;
            }
            WorkerBehavior::Hang => {
                hang(stream, cancel).await;
            }
            WorkerBehavior::Respond { body, delay } => {
                let served = tokio::select! {
                    _ = cancel.cancelled() => return,
                    served = serve_request(stream, body, *delay) => served,
                };
                if served.is_err() {
                    return;
                }
            }
        }
    }
}

/// Read and discard forever (until killed).
async fn hang(mut stream: UnixStream, cancel: &CancellationToken) {
    let mut scratch = [0u8; 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read(&mut scratch) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        }
    }
}

/// One FastCGI request: records in until the empty STDIN, response out,
/// connection closed.
async fn serve_request(
    mut stream: UnixStream,
    body: &[u8],
    delay: Duration,
) -> std::io::Result<()> {
    let mut request_id = 0u16;
    let mut message = Message::new();
    let mut chunk = [0u8; 4096];

    'read: loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        let mut data = &chunk[..read];
        while !data.is_empty() {
            let consumed = message
                .feed(data)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            data = &data[consumed..];
            if !message.is_done() {
                continue;
            }
            if message.rtype() == Some(RecordType::BeginRequest) {
                request_id = message.request_id().unwrap_or(0);
            }
            let stdin_end = message.rtype() == Some(RecordType::Stdin)
                && message.body().is_empty();
            message = Message::new();
            if stdin_end {
                break 'read;
            }
        }
    }

    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }

    let mut response = Vec::new();
    Message::stdout(request_id, body).write_to(&mut response);
    Message::stdout(request_id, b"").write_to(&mut response);
    Message::end_request(request_id, 0, ProtocolStatus::RequestComplete).write_to(&mut response);
    stream.write_all(&response).await?;
    stream.shutdown().await?;
    Ok(())
}
