// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FastCGI record header and fixed-size body layouts.

use crate::error::ProtocolError;

/// The only protocol version this codec speaks.
pub const VERSION_1: u8 = 1;

/// Length of a record header on the wire.
pub const HEADER_LEN: usize = 8;

/// Length of the BEGIN_REQUEST and END_REQUEST bodies.
pub const CONTROL_BODY_LEN: usize = 8;

/// Maximum content length a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xffff;

/// BEGIN_REQUEST flag bit: worker keeps the connection open after the
/// response. The dispatcher clears it so a closed socket means "done".
pub const FCGI_KEEP_CONN: u8 = 1;

/// Record types used by this scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::BeginRequest),
            2 => Some(RecordType::AbortRequest),
            3 => Some(RecordType::EndRequest),
            4 => Some(RecordType::Params),
            5 => Some(RecordType::Stdin),
            6 => Some(RecordType::Stdout),
            7 => Some(RecordType::Stderr),
            8 => Some(RecordType::Data),
            _ => None,
        }
    }

    /// Stream-typed records carry an opaque payload of arbitrary length.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            RecordType::Params
                | RecordType::Stdin
                | RecordType::Stdout
                | RecordType::Stderr
                | RecordType::Data
        )
    }
}

/// Application roles from the FastCGI specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Role {
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl Role {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Role::Responder),
            2 => Some(Role::Authorizer),
            3 => Some(Role::Filter),
            _ => None,
        }
    }
}

/// END_REQUEST protocol status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ProtocolStatus::RequestComplete),
            1 => Some(ProtocolStatus::CantMpxConn),
            2 => Some(ProtocolStatus::Overloaded),
            3 => Some(ProtocolStatus::UnknownRole),
            _ => None,
        }
    }
}

/// A parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub rtype: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    /// Header for an emitted record, padding the body to an 8-byte boundary.
    pub fn for_content(rtype: RecordType, request_id: u16, content_length: usize) -> Self {
        let content_length = content_length.min(MAX_CONTENT_LEN) as u16;
        Header {
            rtype,
            request_id,
            content_length,
            padding_length: (content_length.wrapping_neg() & 7) as u8,
        }
    }

    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        if buf[0] != VERSION_1 {
            return Err(ProtocolError::UnsupportedVersion(buf[0]));
        }
        let rtype = RecordType::from_u8(buf[1]).ok_or(ProtocolError::UnknownRecordType(buf[1]))?;
        Ok(Header {
            rtype,
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [VERSION_1, self.rtype as u8, id[0], id[1], len[0], len[1], self.padding_length, 0]
    }

    /// Total on-wire size of the record this header describes.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
