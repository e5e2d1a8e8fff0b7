// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the scheduler specs.

use fcp_config::{GlobalSettings, SchedulerConfig};
use fcp_core::{ProjectSettings, SystemClock};
use fcp_daemon::engine::test_support::{FakeProcessAdapter, WorkerBehavior};
use fcp_daemon::engine::{ConfigWatcher, ControlEvent, Engine, EngineError, EngineOptions};
use fcp_fcgi::{encode_pair, Message, ProtocolStatus, RecordType, Role};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;

/// Engine options tightened for test time scales.
pub fn spec_options() -> EngineOptions {
    EngineOptions {
        term_timeout: Duration::from_millis(100),
        max_wait: 5,
        admission_delay: Duration::from_millis(100),
        config_path: None,
    }
}

/// A launchable project matching QUERY_STRING against `pattern`.
pub fn project(name: &str, pattern: &str) -> ProjectSettings {
    let mut settings = ProjectSettings::named(name);
    settings.command = Some("/usr/bin/fake-worker".into());
    settings.scan_param = Some("QUERY_STRING".to_string());
    settings.scan_regex = Some(regex::Regex::new(pattern).expect("valid regex"));
    settings.read_timeout = Duration::from_millis(500);
    settings
}

pub struct SchedulerBuilder {
    projects: Vec<ProjectSettings>,
    options: EngineOptions,
    with_watcher: bool,
    behaviors: Vec<(String, WorkerBehavior)>,
    wait_ready: bool,
}

impl SchedulerBuilder {
    pub fn new(projects: Vec<ProjectSettings>) -> Self {
        SchedulerBuilder {
            projects,
            options: spec_options(),
            with_watcher: false,
            behaviors: Vec::new(),
            wait_ready: true,
        }
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_watcher(mut self) -> Self {
        self.with_watcher = true;
        self
    }

    pub fn behavior(mut self, project: &str, behavior: WorkerBehavior) -> Self {
        self.behaviors.push((project.to_string(), behavior));
        self
    }

    /// Don't wait for warm pools on start (crash scenarios).
    pub fn no_ready_wait(mut self) -> Self {
        self.wait_ready = false;
        self
    }

    pub async fn start(self) -> Scheduler {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let adapter = FakeProcessAdapter::new(events_tx.clone());
        for (name, behavior) in &self.behaviors {
            adapter.set_behavior(name, behavior.clone());
        }
        let watcher = if self.with_watcher {
            Some(ConfigWatcher::new(events_tx.clone()).expect("watcher starts"))
        } else {
            None
        };
        let engine =
            Engine::new(adapter.clone(), SystemClock, events_tx.clone(), watcher, self.options);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let run_engine = Arc::clone(&engine);
        let config =
            SchedulerConfig { global: GlobalSettings::default(), projects: self.projects.clone() };
        let handle =
            tokio::spawn(async move { run_engine.run(listener, events_rx, &config).await });

        if self.wait_ready {
            let ready = wait_until(Duration::from_secs(5), || {
                self.projects.iter().filter(|p| p.is_launchable()).all(|p| {
                    engine.registry().active_count(&p.name) >= p.min_proc as usize
                })
            })
            .await;
            assert!(ready, "worker pools should come up");
        }

        Scheduler { engine, adapter, events: events_tx, addr, handle }
    }
}

/// A running scheduler: engine main loop on its own task, fake workers.
pub struct Scheduler {
    pub engine: Arc<Engine<FakeProcessAdapter, SystemClock>>,
    pub adapter: FakeProcessAdapter,
    pub events: UnboundedSender<ControlEvent>,
    pub addr: SocketAddr,
    pub handle: tokio::task::JoinHandle<Result<(), EngineError>>,
}

impl Scheduler {
    /// Ask the scheduler to terminate and wait for a clean exit.
    pub async fn stop(self) {
        self.events.send(ControlEvent::Terminate).expect("send terminate");
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("engine exits after terminate")
            .expect("engine task joins");
        result.expect("clean shutdown");
    }
}

/// Poll `condition` until true or the deadline passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A parsed FastCGI response.
pub struct FcgiResponse {
    pub stdout: Vec<u8>,
    pub end: Option<(u32, Option<ProtocolStatus>)>,
}

impl FcgiResponse {
    pub fn protocol_status(&self) -> Option<ProtocolStatus> {
        self.end.and_then(|(_, status)| status)
    }
}

/// Send one RESPONDER request and collect the response until the
/// scheduler closes the connection.
pub async fn fcgi_request(addr: SocketAddr, query: &str) -> FcgiResponse {
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let request_id = 1;
    let mut payload = Vec::new();
    encode_pair(&mut payload, b"QUERY_STRING", query.as_bytes());
    encode_pair(&mut payload, b"REQUEST_METHOD", b"GET");

    let mut bytes = Vec::new();
    Message::begin_request(request_id, Role::Responder, 0).write_to(&mut bytes);
    Message::params(request_id, &payload).write_to(&mut bytes);
    Message::params(request_id, b"").write_to(&mut bytes);
    Message::stdin(request_id, b"").write_to(&mut bytes);
    stream.write_all(&bytes).await.expect("send request");

    let mut raw = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }

    parse_response(&raw)
}

fn parse_response(mut data: &[u8]) -> FcgiResponse {
    let mut response = FcgiResponse { stdout: Vec::new(), end: None };
    while !data.is_empty() {
        let mut message = Message::new();
        let Ok(consumed) = message.feed(data) else { break };
        if !message.is_done() {
            break;
        }
        data = &data[consumed..];
        match message.rtype() {
            Some(RecordType::Stdout) => response.stdout.extend_from_slice(message.body()),
            Some(RecordType::EndRequest) => response.end = message.end_request_body(),
            _ => {}
        }
    }
    response
}
