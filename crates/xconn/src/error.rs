// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine-wide error type.
//!
//! Mirrors the error kinds the core distinguishes: protocol parse failures,
//! sequence gaps/resets, logon failures, backpressure, I/O, TLS, persistence,
//! listener, and lifecycle errors. Recoverable errors stay local to a
//! session; fatal errors terminate the session but never the engine.

use std::fmt;
use std::io;

/// Top-level error type returned by engine operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed wire bytes: bad `BodyLength`, checksum mismatch, malformed
    /// SoupBinTCP/Pillar header, truncated frame.
    ProtocolParse(String),

    /// Inbound sequence number above the expected value.
    SequenceGap { expected: u64, received: u64 },

    /// Inbound sequence number below the expected value without `PossDupFlag`.
    SequenceLow { expected: u64, received: u64 },

    /// Logon timed out, version mismatch, or duplicate logon.
    LogonFailed(String),

    /// Producer could not claim a ring buffer slot; the ring is full.
    RingFull,

    /// Claimed length exceeds the ring's total capacity.
    RingPayloadTooLarge { requested: usize, capacity: usize },

    /// Socket read/write failure.
    Io(io::Error),

    /// TLS handshake or record-layer failure.
    Tls(String),

    /// Persistence write, sync, or replay failure.
    Persistence(String),

    /// A registered listener callback panicked or returned an error; isolated
    /// from the I/O path and from other listeners.
    Listener(String),

    /// An operation was attempted from a state that does not permit it.
    InvalidState { from: &'static str, event: &'static str },

    /// Session id, stream name, or routing key was not found.
    NotFound(String),

    /// Configuration value missing or malformed.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ProtocolParse(msg) => write!(f, "protocol parse error: {msg}"),
            Error::SequenceGap { expected, received } => write!(
                f,
                "sequence gap: expected {expected}, received {received}"
            ),
            Error::SequenceLow { expected, received } => write!(
                f,
                "sequence too low: expected {expected}, received {received} (no PossDup)"
            ),
            Error::LogonFailed(msg) => write!(f, "logon failed: {msg}"),
            Error::RingFull => write!(f, "ring buffer full"),
            Error::RingPayloadTooLarge { requested, capacity } => write!(
                f,
                "payload of {requested} bytes exceeds ring capacity {capacity}"
            ),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(msg) => write!(f, "TLS error: {msg}"),
            Error::Persistence(msg) => write!(f, "persistence error: {msg}"),
            Error::Listener(msg) => write!(f, "listener error: {msg}"),
            Error::InvalidState { from, event } => {
                write!(f, "invalid transition: event '{event}' in state '{from}'")
            }
            Error::NotFound(what) => write!(f, "not found: {what}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_expected_and_received() {
        let e = Error::SequenceGap {
            expected: 5,
            received: 9,
        };
        assert_eq!(e.to_string(), "sequence gap: expected 5, received 9");
    }

    #[test]
    fn io_error_round_trips_through_from() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
