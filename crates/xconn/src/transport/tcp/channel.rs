// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection TCP channel: outbound ring buffer, overflow queue, and a
//! small connection state machine.
//!
//! ```text
//!   +--------+             +-----------+
//!   |  Idle  |--connect()->| Connecting|--(connected)-->+-----------+
//!   +--------+             +-----------+                | Connected |
//!                                                        +-----+-----+
//!                                                              | close()
//!                                                              v
//!                                                        +-----------+
//!                                                        |  Closed   |
//!                                                        +-----------+
//! ```
//!
//! Producers (any thread) claim a region of [`Ring`], write the payload, and
//! commit; the channel's `drain_to_socket` call (made from the single I/O
//! thread) walks committed entries and writes them raw, with no framing
//! added here -- the protocol codec layer already produced self-framed
//! bytes before claiming the ring slot. A record that doesn't fit the socket
//! buffer in one write is moved to `overflow` and retried on the next
//! writable event.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::byte_stream::ByteStream;
use crate::error::{Error, Result};
use crate::ring::{Claim, Ring};

/// Connection state machine states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl ChannelState {
    pub fn is_operational(&self) -> bool {
        matches!(self, ChannelState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Failed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Idle => "Idle",
            ChannelState::Connecting => "Connecting",
            ChannelState::Connected => "Connected",
            ChannelState::Closing => "Closing",
            ChannelState::Closed => "Closed",
            ChannelState::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Result of attempting to push queued bytes onto the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushResult {
    Complete,
    WouldBlock,
    Empty,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub partial_writes: u64,
    pub overflow_depth: usize,
    pub last_send_time: Option<Instant>,
    pub last_recv_time: Option<Instant>,
}

/// A single TCP connection paired with an outbound ring buffer.
pub struct TcpChannel {
    stream: Box<dyn ByteStream>,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    is_initiator: bool,
    state: ChannelState,
    outbound: Arc<Ring>,
    /// Records that didn't fully drain on the last write attempt, oldest
    /// first, each paired with how many bytes of it have already gone out.
    overflow: VecDeque<(Vec<u8>, usize)>,
    stats: ChannelStats,
    state_changed_at: Instant,
}

impl TcpChannel {
    pub fn new(
        stream: Box<dyn ByteStream>,
        remote_addr: SocketAddr,
        is_initiator: bool,
        ring_capacity: usize,
    ) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        stream.set_nonblocking(true)?;

        Ok(Self {
            stream,
            remote_addr,
            local_addr,
            is_initiator,
            state: ChannelState::Connected,
            outbound: Arc::new(Ring::with_capacity(ring_capacity)),
            overflow: VecDeque::new(),
            stats: ChannelStats::default(),
            state_changed_at: Instant::now(),
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    fn set_state(&mut self, s: ChannelState) {
        if self.state != s {
            self.state = s;
            self.state_changed_at = Instant::now();
        }
    }

    pub fn time_in_state(&self) -> Duration {
        self.state_changed_at.elapsed()
    }

    /// Claim `len` bytes in the outbound ring. Any number of threads may
    /// call this concurrently.
    pub fn try_claim(&self, len: usize) -> Result<Claim> {
        if !self.state.is_operational() {
            return Err(Error::InvalidState {
                from: "channel",
                event: "try_claim",
            });
        }
        self.outbound.try_claim(len)
    }

    /// Write into a previously-claimed region. Safe: the claim uniquely
    /// owns this byte range until committed or aborted.
    pub fn write_claim(&self, claim: &Claim, bytes: &[u8]) {
        self.outbound.write_claim(claim, bytes);
    }

    pub fn commit(&self, claim: Claim) {
        self.outbound.commit(claim);
    }

    pub fn abort(&self, claim: Claim) {
        self.outbound.abort(claim);
    }

    /// Write a pre-framed record directly, bypassing the ring -- used for
    /// admin traffic synthesized on the I/O thread itself (e.g. a rejected
    /// logon response) where there's no producer/consumer race to resolve.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.overflow.push_back((bytes.to_vec(), 0));
    }

    /// Drain committed ring records straight to the socket; anything that
    /// doesn't fit moves to `overflow` instead of being held in the ring
    /// (the ring's slot must be freed so the `read_cursor` can advance).
    pub fn drain_ring_to_socket(&mut self) -> io::Result<FlushResult> {
        if !self.state.is_operational() {
            return Ok(FlushResult::Empty);
        }

        let stream = &mut self.stream;
        let stats = &mut self.stats;
        let overflow = &mut self.overflow;
        let mut blocked = false;

        self.outbound.controlled_read(|payload| {
            if blocked || !overflow.is_empty() {
                overflow.push_back((payload.to_vec(), 0));
                return crate::ring::ReadAction::Continue;
            }
            match write_all_nonblocking(stream.as_mut(), payload) {
                Ok(WriteOutcome::Complete(n)) => {
                    stats.bytes_sent += n as u64;
                    stats.last_send_time = Some(Instant::now());
                    crate::ring::ReadAction::Continue
                }
                Ok(WriteOutcome::Partial(n)) => {
                    stats.bytes_sent += n as u64;
                    stats.partial_writes += 1;
                    overflow.push_back((payload[n..].to_vec(), 0));
                    blocked = true;
                    crate::ring::ReadAction::Continue
                }
                Err(_) => {
                    blocked = true;
                    overflow.push_back((payload.to_vec(), 0));
                    crate::ring::ReadAction::Continue
                }
            }
        });
        self.stats.overflow_depth = self.overflow.len();

        self.flush_overflow()
    }

    fn flush_overflow(&mut self) -> io::Result<FlushResult> {
        while let Some((buf, offset)) = self.overflow.front_mut() {
            match write_all_nonblocking(self.stream.as_mut(), &buf[*offset..]) {
                Ok(WriteOutcome::Complete(n)) => {
                    self.stats.bytes_sent += n as u64;
                    self.stats.last_send_time = Some(Instant::now());
                    self.overflow.pop_front();
                }
                Ok(WriteOutcome::Partial(n)) => {
                    self.stats.bytes_sent += n as u64;
                    self.stats.partial_writes += 1;
                    *offset += n;
                    self.stats.overflow_depth = self.overflow.len();
                    return Ok(FlushResult::WouldBlock);
                }
                Err(e) => {
                    self.set_state(ChannelState::Failed);
                    return Err(e);
                }
            }
        }
        self.stats.overflow_depth = 0;
        Ok(FlushResult::Complete)
    }

    /// Flush the overflow queue, then drain any newly-committed ring
    /// records. Call on a writable event and after every commit.
    pub fn flush(&mut self) -> io::Result<FlushResult> {
        if !self.overflow.is_empty() {
            let r = self.flush_overflow()?;
            if r == FlushResult::WouldBlock {
                return Ok(r);
            }
        }
        self.drain_ring_to_socket()
    }

    /// Read available bytes into `buf`. Returns `Ok(0)` on EOF, `WouldBlock`
    /// when nothing is available.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        if n > 0 {
            self.stats.bytes_received += n as u64;
            self.stats.last_recv_time = Some(Instant::now());
        }
        Ok(n)
    }

    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.set_state(ChannelState::Closing);
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            self.set_state(ChannelState::Closed);
        }
    }

    pub fn outbound_ring(&self) -> &Ring {
        &self.outbound
    }

    /// A cloneable, thread-safe handle onto this channel's outbound ring.
    ///
    /// Per the concurrency model, application/session code never touches
    /// the socket directly; it claims, writes, and commits into this handle
    /// from whatever thread it runs on, and the I/O thread (the sole owner
    /// of the [`TcpChannel`] itself) drains committed records to the wire.
    pub fn outbound_handle(&self) -> Arc<Ring> {
        Arc::clone(&self.outbound)
    }
}

enum WriteOutcome {
    Complete(usize),
    Partial(usize),
}

fn write_all_nonblocking(stream: &mut dyn ByteStream, buf: &[u8]) -> io::Result<WriteOutcome> {
    match stream.write(buf) {
        Ok(n) if n == buf.len() => Ok(WriteOutcome::Complete(n)),
        Ok(n) => Ok(WriteOutcome::Partial(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::Partial(0)),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => write_all_nonblocking(stream, buf),
        Err(e) => Err(e),
    }
}
