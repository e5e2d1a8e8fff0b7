// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fcp-fcgi: FastCGI 1.0 wire codec.
//!
//! Byte-oriented parsers and emitters for FastCGI records, the name/value
//! parameter encoding, and a request-level session tracker. Everything here
//! is fragment-tolerant: input may arrive in arbitrarily sized chunks and a
//! name or value may straddle record boundaries.

pub mod error;
pub mod message;
pub mod params;
pub mod record;
pub mod session;

pub use error::ProtocolError;
pub use message::{clear_keep_conn, Message};
pub use params::{encode_pair, ParamDecoder};
pub use record::{Header, ProtocolStatus, RecordType, Role, FCGI_KEEP_CONN, HEADER_LEN, VERSION_1};
pub use session::{Session, SessionState};
