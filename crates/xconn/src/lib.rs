// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # xconn - Multi-protocol Exchange Connectivity Engine
//!
//! `xconn` is a low-latency connectivity layer for trading venues speaking
//! FIX, OUCH/SoupBinTCP, NYSE Pillar, or SBE-framed binary protocols over
//! TCP. One process can run any mix of sessions, each independently
//! connecting out to a venue or accepting venue-initiated connections,
//! while sharing a single-threaded I/O event loop and a lock-free outbound
//! ring per connection.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xconn::engine::{Engine, EngineConfig};
//! use xconn::config::SessionConfig;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! engine.register(SessionConfig::fix_initiator("ARCA", "127.0.0.1:9001"))?;
//! engine.connect("ARCA")?;
//! # Ok::<(), xconn::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------+
//! | engine   - session registry, acceptors, schedule events   |
//! +-----------------------------------------------------------+
//! | session  - per-connection state machine (logon/seq/resend)|
//! +-----------------------------------------------------------+
//! | protocol - FIX / binary (OUCH, Pillar, SBE) codecs        |
//! +-----------------------------------------------------------+
//! | acceptor - multi-session demux on a single listening port |
//! +-----------------------------------------------------------+
//! | net      - mio event loop (one thread owns every socket)  |
//! | transport::tcp - per-connection ring buffer + overflow    |
//! +-----------------------------------------------------------+
//! | ring / buffer - MPSC ring buffer, typed byte-buffer views |
//! | persistence    - append-only segmented message log        |
//! +-----------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! | Module | Role |
//! |--------|------|
//! | [`error`] | Engine-wide [`Error`] and [`Result`] types |
//! | [`buffer`] | Typed, bounds-checked byte-buffer view (`DirectBuffer`) |
//! | [`ring`] | Lock-free MPSC ring buffer used by every outbound channel |
//! | [`persistence`] | Append-only segmented log, tailing reader, cross-stream merge |
//! | [`net`] | Single-threaded `mio` event loop shared by all connections |
//! | [`transport`] | Per-connection TCP channel (ring-backed outbound queue) |
//! | [`protocol`] | FIX tag/value codec and binary (OUCH/Pillar/SBE) codec |
//! | [`acceptor`] | Identity-sniffing demux for a shared listening port |
//! | [`session`] | Per-connection session state machine |
//! | [`scheduler`] | Market-hours time-window clock, drives session lifecycle |
//! | [`engine`] | Top-level orchestrator: registry, wiring, listener fan-out |
//! | [`reliability`] | Sequence-range and gap-tracking primitives shared by sessions |
//! | [`config`] | Runtime configuration (sessions, schedule, transport) |
//! | [`logging`] | Compile-time configurable logging, zero-cost when disabled |

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Engine-wide error and result types.
pub mod error;
/// Typed byte-buffer view used by the protocol codecs.
pub mod buffer;
/// Lock-free MPSC ring buffer backing every outbound channel.
pub mod ring;
/// Append-only segmented persistence log, tailing reader, and cross-stream merge.
pub mod persistence;
/// Single-threaded `mio` event loop shared by every connection.
pub mod net;
/// TCP transport primitives (ring-backed outbound channel, optional TLS).
pub mod transport;
/// FIX tag/value codec and binary (OUCH/Pillar/SBE) codec.
pub mod protocol;
/// Identity-sniffing demux for a shared listening port.
pub mod acceptor;
/// Per-connection session state machine.
pub mod session;
/// Market-hours schedule clock: edge-triggered session start/end/reset events.
pub mod scheduler;
/// Top-level orchestrator: registry, wiring, listener fan-out.
pub mod engine;
/// Sequence-range and gap-tracking primitives shared by the session layer.
pub mod reliability;
/// Compile-time configurable logging system (zero-cost when disabled).
pub mod logging;
/// Runtime configuration: sessions, schedules, transport settings.
pub mod config;

pub use error::{Error, Result};

/// Engine version string.
pub const VERSION: &str = "0.1.0";
