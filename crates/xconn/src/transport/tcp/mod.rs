// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport primitives.
//!
//! - `byte_stream` - stream abstraction shared by plain TCP, TLS, and tests
//! - `channel` - per-connection outbound ring buffer + overflow queue
//! - `tls` - optional TLS support behind the `tcp-tls` feature
//!
//! The event loop that drives these sockets lives in [`crate::net`]; this
//! module only has the per-connection pieces it manages.

pub mod byte_stream;
pub mod channel;
pub mod tls;

pub use byte_stream::{BoxedByteStream, ByteStream};
pub use channel::{ChannelState, ChannelStats, FlushResult, TcpChannel};

#[cfg(feature = "tcp-tls")]
pub use tls::{TlsAcceptor, TlsConnector, TlsStream};
pub use tls::{TlsConfig, TlsConfigBuilder, TlsError, TlsVersion};
