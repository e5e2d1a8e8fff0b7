// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental single-record parser and emitter.
//!
//! A [`Message`] consumes byte fragments until exactly one record is
//! complete, reporting how many bytes it took from each chunk so a caller
//! can run several messages over one stream. The same type doubles as the
//! emitter: builder constructors produce completed messages that
//! [`Message::write_to`] serializes back out.

use crate::error::ProtocolError;
use crate::record::{
    Header, ProtocolStatus, RecordType, Role, CONTROL_BODY_LEN, FCGI_KEEP_CONN, HEADER_LEN,
};

/// One FastCGI record, parsed incrementally or built for emission.
#[derive(Debug, Clone)]
pub struct Message {
    header_buf: [u8; HEADER_LEN],
    header_fill: usize,
    header: Option<Header>,
    body: Vec<u8>,
    /// Body plus padding bytes consumed so far.
    tail_fill: usize,
    done: bool,
}

impl Message {
    pub fn new() -> Self {
        Message {
            header_buf: [0; HEADER_LEN],
            header_fill: 0,
            header: None,
            body: Vec::new(),
            tail_fill: 0,
            done: false,
        }
    }

    /// Consume bytes from `data` until this record is complete.
    ///
    /// Returns the number of bytes taken from `data`; zero once the record
    /// is already complete. Never allocates beyond the record's declared
    /// content length.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, ProtocolError> {
        if self.done {
            return Ok(0);
        }
        let mut consumed = 0;

        if self.header.is_none() {
            let want = HEADER_LEN - self.header_fill;
            let take = want.min(data.len());
            self.header_buf[self.header_fill..self.header_fill + take]
                .copy_from_slice(&data[..take]);
            self.header_fill += take;
            consumed += take;
            if self.header_fill < HEADER_LEN {
                return Ok(consumed);
            }
            let header = Header::parse(&self.header_buf)?;
            self.body.reserve_exact(header.content_length as usize);
            self.header = Some(header);
        }

        let header = match self.header {
            Some(h) => h,
            None => return Ok(consumed),
        };
        let content_len = header.content_length as usize;
        let total_tail = content_len + header.padding_length as usize;

        let rest = &data[consumed..];
        let take = (total_tail - self.tail_fill).min(rest.len());
        // Only the content portion is retained; padding is skipped.
        if self.tail_fill < content_len {
            let content_take = take.min(content_len - self.tail_fill);
            self.body.extend_from_slice(&rest[..content_take]);
        }
        self.tail_fill += take;
        consumed += take;

        if self.tail_fill == total_tail {
            self.done = true;
        }
        Ok(consumed)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn rtype(&self) -> Option<RecordType> {
        self.header.map(|h| h.rtype)
    }

    pub fn request_id(&self) -> Option<u16> {
        self.header.map(|h| h.request_id)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Role from a BEGIN_REQUEST body, raw.
    pub fn role_raw(&self) -> Option<u16> {
        match self.rtype() {
            Some(RecordType::BeginRequest) if self.body.len() >= 2 => {
                Some(u16::from_be_bytes([self.body[0], self.body[1]]))
            }
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role_raw().and_then(Role::from_u16)
    }

    /// Flags byte from a BEGIN_REQUEST body.
    pub fn flags(&self) -> Option<u8> {
        match self.rtype() {
            Some(RecordType::BeginRequest) if self.body.len() >= 3 => Some(self.body[2]),
            _ => None,
        }
    }

    /// Overwrite the flags byte of a parsed BEGIN_REQUEST.
    pub fn set_flags(&mut self, flags: u8) -> bool {
        match self.rtype() {
            Some(RecordType::BeginRequest) if self.body.len() >= 3 => {
                self.body[2] = flags;
                true
            }
            _ => false,
        }
    }

    /// Total serialized size (header + content + padding).
    pub fn wire_len(&self) -> usize {
        self.header.map(|h| h.wire_len()).unwrap_or(0)
    }

    /// Serialize this record, header first, padding zero-filled.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let header = match self.header {
            Some(h) => h,
            None => return,
        };
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.body);
        out.resize(out.len() + header.padding_length as usize, 0);
    }

    fn built(header: Header, body: Vec<u8>) -> Self {
        Message {
            header_buf: [0; HEADER_LEN],
            header_fill: HEADER_LEN,
            header: Some(header),
            tail_fill: body.len() + header.padding_length as usize,
            body,
            done: true,
        }
    }

    /// Build a BEGIN_REQUEST record.
    pub fn begin_request(request_id: u16, role: Role, flags: u8) -> Self {
        let role = (role as u16).to_be_bytes();
        let body = vec![role[0], role[1], flags, 0, 0, 0, 0, 0];
        let header = Header::for_content(RecordType::BeginRequest, request_id, body.len());
        Message::built(header, body)
    }

    /// Build a PARAMS record; an empty payload terminates the stream.
    pub fn params(request_id: u16, payload: &[u8]) -> Self {
        let header = Header::for_content(RecordType::Params, request_id, payload.len());
        Message::built(header, payload.to_vec())
    }

    /// Build a STDIN record; an empty payload terminates the stream.
    pub fn stdin(request_id: u16, payload: &[u8]) -> Self {
        let header = Header::for_content(RecordType::Stdin, request_id, payload.len());
        Message::built(header, payload.to_vec())
    }

    /// Build a STDOUT record (response side).
    pub fn stdout(request_id: u16, payload: &[u8]) -> Self {
        let header = Header::for_content(RecordType::Stdout, request_id, payload.len());
        Message::built(header, payload.to_vec())
    }

    /// Build an END_REQUEST record.
    pub fn end_request(request_id: u16, app_status: u32, status: ProtocolStatus) -> Self {
        let app = app_status.to_be_bytes();
        let body = vec![app[0], app[1], app[2], app[3], status as u8, 0, 0, 0];
        let header = Header::for_content(RecordType::EndRequest, request_id, body.len());
        Message::built(header, body)
    }

    /// END_REQUEST body fields, if this is a complete END_REQUEST.
    pub fn end_request_body(&self) -> Option<(u32, Option<ProtocolStatus>)> {
        match self.rtype() {
            Some(RecordType::EndRequest) if self.body.len() >= CONTROL_BODY_LEN => {
                let app = u32::from_be_bytes([self.body[0], self.body[1], self.body[2], self.body[3]]);
                Some((app, ProtocolStatus::from_u8(self.body[4])))
            }
            _ => None,
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new()
    }
}

/// Clear the KEEP_CONN bit of a BEGIN_REQUEST record sitting at the start
/// of `buf`, in place.
///
/// The record must be fully contained in `buf`; callers coalesce fragmented
/// input first. Returns whether the buffer was modified. Records of other
/// types are left untouched.
pub fn clear_keep_conn(buf: &mut [u8]) -> Result<bool, ProtocolError> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::RecordIncomplete);
    }
    let mut head = [0; HEADER_LEN];
    head.copy_from_slice(&buf[..HEADER_LEN]);
    let header = Header::parse(&head)?;
    if buf.len() < header.wire_len() {
        return Err(ProtocolError::RecordIncomplete);
    }
    if header.rtype != RecordType::BeginRequest {
        return Ok(false);
    }
    if header.content_length < 3 {
        return Err(ProtocolError::BadBodyLength {
            expected: CONTROL_BODY_LEN,
            got: header.content_length as usize,
        });
    }
    let flags = &mut buf[HEADER_LEN + 2];
    if *flags & FCGI_KEEP_CONN != 0 {
        *flags &= !FCGI_KEEP_CONN;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
