// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request-level state tracker over the record parser.
//!
//! A [`Session`] watches one FastCGI request flow by. It does not retain
//! record payloads (the dispatcher keeps its own replay buffer); it tracks
//! the state needed for routing: request id, role, and the parameters seen
//! so far. Parameters are queryable as soon as their PARAMS record has been
//! parsed, before the stream is terminated.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::params::ParamDecoder;
use crate::record::{RecordType, Role};

/// Where in the request flow a session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No BEGIN_REQUEST seen yet.
    Init,
    /// BEGIN_REQUEST parsed.
    Running,
    /// Empty PARAMS record received, parameter stream closed.
    ParamsDone,
    /// END_REQUEST or ABORT_REQUEST seen.
    End,
    /// Protocol violation; terminal.
    Error,
}

/// Tracks one request on one connection (no multiplexing).
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    request_id: Option<u16>,
    role_raw: Option<u16>,
    flags: u8,
    params: Vec<(String, String)>,
    decoder: ParamDecoder,
    current: Message,
    error: Option<ProtocolError>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            state: SessionState::Init,
            request_id: None,
            role_raw: None,
            flags: 0,
            params: Vec::new(),
            decoder: ParamDecoder::new(),
            current: Message::new(),
            error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Request id of the running session, once a BEGIN_REQUEST was parsed.
    pub fn request_id(&self) -> Option<u16> {
        self.request_id
    }

    /// Raw role value from BEGIN_REQUEST.
    pub fn role_raw(&self) -> Option<u16> {
        self.role_raw
    }

    pub fn role(&self) -> Option<Role> {
        self.role_raw.and_then(Role::from_u16)
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Look up a parameter seen so far. Usable before PARAMS_DONE.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// The violation that moved this session to [`SessionState::Error`].
    pub fn error(&self) -> Option<&ProtocolError> {
        self.error.as_ref()
    }

    /// True while the current record needs more bytes to complete.
    pub fn needs_more_data(&self) -> bool {
        !self.current.is_done()
    }

    /// Consume a chunk, advancing across record boundaries.
    ///
    /// Returns the bytes consumed; short only when the session entered
    /// [`SessionState::Error`] mid-chunk.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;
        while consumed < data.len() {
            if matches!(self.state, SessionState::Error) {
                break;
            }
            match self.current.feed(&data[consumed..]) {
                Ok(n) => consumed += n,
                Err(e) => {
                    self.fail(e);
                    break;
                }
            }
            if self.current.is_done() {
                let message = std::mem::take(&mut self.current);
                if let Err(e) = self.on_record(&message) {
                    self.fail(e);
                    break;
                }
            }
        }
        consumed
    }

    fn fail(&mut self, error: ProtocolError) {
        self.state = SessionState::Error;
        self.error = Some(error);
    }

    fn on_record(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let Some(header) = message.header() else { return Ok(()) };
        let rtype = header.rtype;

        match self.state {
            SessionState::Init => {
                if rtype != RecordType::BeginRequest {
                    return Err(ProtocolError::UnexpectedRecord(rtype));
                }
                self.request_id = Some(header.request_id);
                self.role_raw = message.role_raw();
                self.flags = message.flags().unwrap_or(0);
                self.state = SessionState::Running;
                Ok(())
            }
            SessionState::Running | SessionState::ParamsDone => {
                let expected = self.request_id.unwrap_or(0);
                if header.request_id != expected {
                    return Err(ProtocolError::RequestIdMismatch {
                        expected,
                        got: header.request_id,
                    });
                }
                match rtype {
                    RecordType::BeginRequest => Err(ProtocolError::UnexpectedRecord(rtype)),
                    RecordType::Params => {
                        if message.body().is_empty() {
                            self.state = SessionState::ParamsDone;
                        } else {
                            self.params.extend(self.decoder.feed(message.body()));
                        }
                        Ok(())
                    }
                    RecordType::AbortRequest | RecordType::EndRequest => {
                        self.state = SessionState::End;
                        Ok(())
                    }
                    // Stream payloads pass through untracked.
                    RecordType::Stdin
                    | RecordType::Data
                    | RecordType::Stdout
                    | RecordType::Stderr => Ok(()),
                }
            }
            // Trailing records after the end of the request are ignored.
            SessionState::End => Ok(()),
            SessionState::Error => Ok(()),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
