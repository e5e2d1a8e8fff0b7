// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection dispatcher.
//!
//! One task per accepted client connection: read the request head and
//! classify it to a project, lease an idle worker under bounded-wait
//! admission, replay the buffered head to the worker with KEEP_CONN
//! cleared, then splice bytes both ways until either side hangs up.

use super::adapter::ProcessAdapter;
use super::socket;
use super::Engine;
use fcp_core::{Clock, ProjectSettings, RegistryError, WorkerPid, WorkerState};
use fcp_fcgi::record::HEADER_LEN;
use fcp_fcgi::{clear_keep_conn, Message, ProtocolStatus, Role, Session, SessionState};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info, warn};

/// Cap for the transfer buffer; the actual size is the smallest socket
/// buffer involved, bounded by this.
const DEFAULT_TRANSFER_BUF: usize = 4 * 1024;

/// The BEGIN_REQUEST record size the KEEP_CONN rewrite needs contiguous.
const BEGIN_RECORD_LEN: usize = HEADER_LEN + 8;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("reading from client: {0}")]
    ClientRead(#[source] std::io::Error),

    #[error("writing to client: {0}")]
    ClientWrite(#[source] std::io::Error),

    #[error("cannot connect to worker socket '{socket}': {source}")]
    WorkerConnect {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("splicing to worker: {0}")]
    WorkerIo(#[source] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What the identification phase produced.
struct RequestHead {
    /// Raw chunks exactly as read; replayed to the worker byte-for-byte.
    replay: Vec<Vec<u8>>,
    session: Session,
}

impl<P, C> Engine<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    /// Entry point for one accepted connection.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "accepted connection");
        let started = self.clock().now();
        match self.dispatch(stream, &peer).await {
            Ok(()) => {
                let elapsed = self.clock().now().duration_since(started);
                self.stats().add_connection(elapsed);
                info!(%peer, elapsed_ms = elapsed.as_millis() as u64, "connection done");
            }
            Err(error) => {
                warn!(%peer, %error, "connection failed");
            }
        }
    }

    async fn dispatch(
        &self,
        mut stream: TcpStream,
        peer: &SocketAddr,
    ) -> Result<(), DispatchError> {
        // (a) identification
        let head = self.read_request_head(&mut stream).await?;
        let request_id = head.session.request_id().unwrap_or(0);
        let role = head.session.role();

        if head.session.state() == SessionState::Error {
            debug!(%peer, error = ?head.session.error(), "protocol violation from client");
            return self
                .answer_end_request(&mut stream, request_id, ProtocolStatus::UnknownRole)
                .await;
        }

        // (b) project match, first configured project wins
        let project = self.match_project(&head.session);
        let Some(project) = project else {
            info!(%peer, "no project matches request");
            if role == Some(Role::Responder) {
                return self
                    .answer_end_request(&mut stream, request_id, ProtocolStatus::Overloaded)
                    .await;
            }
            return Ok(());
        };

        // (c) admission
        let Some(pid) = self.admit(&project).await else {
            info!(%peer, project = %project.name, "no idle worker, answering overloaded");
            if role == Some(Role::Responder) {
                return self
                    .answer_end_request(&mut stream, request_id, ProtocolStatus::Overloaded)
                    .await;
            }
            return Ok(());
        };
        info!(%peer, project = %project.name, worker = %pid, "dispatching request");

        // (d) hook-up, (e) splice, (f) release
        match self.run_splice(stream, pid, head.replay).await {
            Ok(()) => {
                // Worker done with this request; back to the idle pool.
                // Failure here means the worker died mid-release and the
                // exit report is already handling it.
                if let Err(error) =
                    self.registry().set_state(pid, WorkerState::Idle, self.clock().now())
                {
                    debug!(worker = %pid, %error, "cannot return worker to idle");
                }
                Ok(())
            }
            Err(error) => {
                let _ = self.registry().move_worker_to_shutdown(pid);
                self.shutdown_signal().notify_change();
                Err(error)
            }
        }
    }

    /// Read and retain the request head until the parameter stream is
    /// closed (or the request ended / broke).
    async fn read_request_head(&self, stream: &mut TcpStream) -> Result<RequestHead, DispatchError> {
        let bufsize = recv_buffer_bound(stream);
        let mut chunk = vec![0u8; bufsize];
        let mut head = RequestHead { replay: Vec::new(), session: Session::new() };

        loop {
            let read = stream.read(&mut chunk).await.map_err(DispatchError::ClientRead)?;
            if read == 0 {
                break;
            }
            head.session.feed(&chunk[..read]);
            head.replay.push(chunk[..read].to_vec());
            match head.session.state() {
                SessionState::ParamsDone | SessionState::End | SessionState::Error => break,
                SessionState::Init | SessionState::Running => {}
            }
        }
        Ok(head)
    }

    fn match_project(&self, session: &Session) -> Option<ProjectSettings> {
        self.registry().projects().into_iter().find(|project| {
            let Some(key) = project.scan_param.as_deref() else {
                debug!(project = %project.name, "no scan parameter configured");
                return false;
            };
            session.param(key).map(|value| project.matches(value)).unwrap_or(false)
        })
    }

    /// Admission control: top up the idle pool, then try to lease an idle
    /// worker a bounded number of times.
    async fn admit(&self, project: &ProjectSettings) -> Option<WorkerPid> {
        let pending = self.registry().count_states(
            &project.name,
            &[WorkerState::Start, WorkerState::Init, WorkerState::Idle],
        );
        // Top up towards min_proc, but never beyond max_proc living workers
        let capacity = project.max_proc as i64 - self.registry().pool_size(&project.name) as i64;
        let missing = (project.min_proc as i64 - pending as i64).min(capacity);
        if missing > 0 && project.is_launchable() {
            debug!(project = %project.name, missing, "starting workers to reach min_proc");
            self.start_new_process_detached(missing as u32, project.name.clone(), false);
        }

        let max_wait = self.options().max_wait;
        for attempt in 0..=max_wait {
            if let Some(pid) = self.registry().acquire_idle(&project.name) {
                return Some(pid);
            }
            if attempt == max_wait {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.options().admission_delay) => {}
                _ = self.cancel_token().cancelled() => break,
            }
        }
        None
    }

    async fn answer_end_request(
        &self,
        stream: &mut TcpStream,
        request_id: u16,
        status: ProtocolStatus,
    ) -> Result<(), DispatchError> {
        let mut buf = Vec::new();
        Message::end_request(request_id, 0, status).write_to(&mut buf);
        stream.write_all(&buf).await.map_err(DispatchError::ClientWrite)
    }

    /// Phases (d) and (e): connect to the worker, rewrite KEEP_CONN in
    /// the replay head, then copy both ways until EOF or reset.
    async fn run_splice(
        &self,
        client: TcpStream,
        pid: WorkerPid,
        mut replay: Vec<Vec<u8>>,
    ) -> Result<(), DispatchError> {
        let socket_name = self.registry().worker_socket(pid)?;
        let worker = socket::connect_abstract(&socket_name).await.map_err(|source| {
            DispatchError::WorkerConnect { socket: socket_name.clone(), source }
        })?;

        // The worker must close its connection when the response is done,
        // so completion is observable as EOF
        coalesce_head(&mut replay, BEGIN_RECORD_LEN);
        if let Some(first) = replay.first_mut() {
            if let Err(error) = clear_keep_conn(first) {
                debug!(worker = %pid, %error, "keep-conn rewrite skipped");
            }
        }

        let bufsize = transfer_buffer_bound(&client, &worker);
        splice(client, worker, &replay, bufsize, self.cancel_token()).await
    }
}

/// Merge leading chunks until the first one holds at least `want` bytes.
fn coalesce_head(replay: &mut Vec<Vec<u8>>, want: usize) {
    while replay.first().is_some_and(|first| first.len() < want) && replay.len() > 1 {
        let second = replay.remove(1);
        replay[0].extend_from_slice(&second);
    }
}

/// Identification read size: client receive buffer, capped.
fn recv_buffer_bound(stream: &TcpStream) -> usize {
    let mut size = DEFAULT_TRANSFER_BUF;
    if let Ok(rcv) = socket2::SockRef::from(stream).recv_buffer_size() {
        size = size.min(rcv.max(1));
    }
    size
}

/// Splice buffer: smallest of both sockets' buffer sizes, capped.
fn transfer_buffer_bound(client: &TcpStream, worker: &UnixStream) -> usize {
    let mut size = DEFAULT_TRANSFER_BUF;
    let client_ref = socket2::SockRef::from(client);
    let worker_ref = socket2::SockRef::from(worker);
    for bound in [
        client_ref.recv_buffer_size(),
        client_ref.send_buffer_size(),
        worker_ref.recv_buffer_size(),
        worker_ref.send_buffer_size(),
    ]
    .into_iter()
    .flatten()
    {
        size = size.min(bound.max(1));
    }
    size
}

/// EOF-or-reset classification for the copy loop.
fn is_clean_close(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::ConnectionReset
}

/// Full-duplex bounded-buffer copy.
///
/// The replay buffer is flushed to the worker before any client read, so
/// bytes reach the worker in arrival order. Either side's EOF or reset
/// ends the loop; a cancellation (termination signal) does too.
async fn splice(
    client: TcpStream,
    worker: UnixStream,
    replay: &[Vec<u8>],
    bufsize: usize,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<(), DispatchError> {
    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut worker_rd, mut worker_wr) = worker.into_split();

    for chunk in replay {
        match worker_wr.write_all(chunk).await {
            Ok(()) => {}
            Err(e) if is_clean_close(&e) => return Ok(()),
            Err(e) => return Err(DispatchError::WorkerIo(e)),
        }
    }

    let mut to_worker = vec![0u8; bufsize];
    let mut to_client = vec![0u8; bufsize];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = client_rd.read(&mut to_worker) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => match worker_wr.write_all(&to_worker[..n]).await {
                        Ok(()) => {}
                        Err(e) if is_clean_close(&e) => break,
                        Err(e) => return Err(DispatchError::WorkerIo(e)),
                    },
                    Err(e) if is_clean_close(&e) => break,
                    Err(e) => return Err(DispatchError::ClientRead(e)),
                }
            }
            read = worker_rd.read(&mut to_client) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => match client_wr.write_all(&to_client[..n]).await {
                        Ok(()) => {}
                        Err(e) if is_clean_close(&e) => break,
                        Err(e) => return Err(DispatchError::ClientWrite(e)),
                    },
                    Err(e) if is_clean_close(&e) => break,
                    Err(e) => return Err(DispatchError::WorkerIo(e)),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
