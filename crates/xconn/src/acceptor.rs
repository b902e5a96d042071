// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-session acceptor: demuxes a single listening port across many
//! registered sessions by sniffing login credentials out of the first bytes
//! of a fresh connection.
//!
//! A listening socket carries one wire protocol ([`AcceptorProtocol`]).
//! Every accept gets a [`PendingConnection`] that buffers inbound bytes (up
//! to [`Acceptor::max_pending_bytes`]) until a [`RouteKey`] can be extracted:
//!
//! - FIX: `SenderCompID` (49) / `TargetCompID` (56), matched against the
//!   inverse of a registered session's own identity (their sender is our
//!   target, their target is our sender).
//! - SoupBinTCP: the 6-byte space-padded username on the first Login
//!   Request packet.
//!
//! On a match the bound [`SessionSink`] is invoked with the buffered prefix
//! so it sees those bytes exactly as if they'd just arrived on the wire. On
//! a mismatch, FIX connections get a synthesized `Logout` with an
//! explanatory `Text` before the channel closes; SoupBinTCP connections
//! close immediately. A port with exactly one registered route may be
//! configured to fall back to it for any unrecognized identity.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::logging;
use crate::protocol::{binary, fix, FixMessageBuilder};
use crate::ring::Ring;

/// Which wire protocol a listening port's acceptor demuxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorProtocol {
    Fix,
    SoupBinTcp,
}

/// Identity a session is registered under, inverted from its own config
/// (our-sender/our-target become their-target/their-sender).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Fix { their_sender: String, their_target: String, port: u16 },
    Username { username: String, port: u16 },
}

/// A connection bound to its matched session: the event-loop token, the
/// outbound ring handle, and whatever bytes were already buffered while the
/// identity was being sniffed.
pub struct MatchedConnection {
    pub token: usize,
    pub remote_addr: SocketAddr,
    pub ring: Arc<Ring>,
    pub buffered_prefix: Vec<u8>,
}

/// Implemented by whatever owns a registered session; invoked once the
/// acceptor has bound a fresh connection to it.
pub trait SessionSink: Send + Sync {
    fn on_connected(&self, matched: MatchedConnection);
}

/// Outcome of feeding a chunk of bytes into [`Acceptor::on_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorAction {
    /// Not enough data yet to resolve an identity.
    NeedMore,
    /// Matched and handed off to a [`SessionSink`]; the token is no longer
    /// tracked by the acceptor.
    Bound,
    /// Identity resolved but no route matched. For FIX a rejection Logout
    /// was already committed to the connection's ring; the caller should
    /// flush and close the token. For SoupBinTCP the caller should close
    /// immediately with no further write.
    Rejected,
    /// The buffered prefix exceeded `max_pending_bytes` without resolving
    /// an identity; the caller should close the token.
    Overflow,
}

struct PendingConnection {
    remote_addr: SocketAddr,
    ring: Arc<Ring>,
    buf: Vec<u8>,
}

/// Default prefix bound per spec: 64 KiB of inbound bytes buffered before an
/// unresolved identity is treated as an overflow.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024;

/// Demuxes one listening port's accepted connections across its registered
/// sessions.
pub struct Acceptor {
    protocol: AcceptorProtocol,
    port: u16,
    max_pending_bytes: usize,
    pending: DashMap<usize, PendingConnection>,
    routes: DashMap<RouteKey, Arc<dyn SessionSink>>,
    single_route: DashMap<(), (RouteKey, Arc<dyn SessionSink>)>,
}

impl Acceptor {
    #[must_use]
    pub fn new(protocol: AcceptorProtocol, port: u16) -> Self {
        Self::with_max_pending_bytes(protocol, port, DEFAULT_MAX_PENDING_BYTES)
    }

    #[must_use]
    pub fn with_max_pending_bytes(protocol: AcceptorProtocol, port: u16, max_pending_bytes: usize) -> Self {
        Self {
            protocol,
            port,
            max_pending_bytes,
            pending: DashMap::new(),
            routes: DashMap::new(),
            single_route: DashMap::new(),
        }
    }

    #[must_use]
    pub fn protocol(&self) -> AcceptorProtocol {
        self.protocol
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Register a session's identity. `key` must already carry the inverted
    /// sender/target or the session's expected username.
    ///
    /// When exactly one route is registered, unrecognized identities may
    /// fall back to it (see [`Acceptor::on_data`]); registering a second
    /// route disables that fallback.
    pub fn register_route(&self, key: RouteKey, sink: Arc<dyn SessionSink>) {
        self.routes.insert(key.clone(), sink.clone());
        if self.routes.len() == 1 {
            self.single_route.insert((), (key, sink));
        } else {
            self.single_route.remove(&());
        }
    }

    pub fn unregister_route(&self, key: &RouteKey) {
        self.routes.remove(key);
        if self.routes.len() == 1 {
            if let Some(entry) = self.routes.iter().next() {
                self.single_route.insert((), (entry.key().clone(), entry.value().clone()));
            }
        } else {
            self.single_route.remove(&());
        }
    }

    /// Start tracking a fresh accept. Call on [`crate::net::LoopEvent::Accepted`].
    pub fn on_accepted(&self, token: usize, remote_addr: SocketAddr, ring: Arc<Ring>) {
        self.pending.insert(
            token,
            PendingConnection {
                remote_addr,
                ring,
                buf: Vec::new(),
            },
        );
    }

    /// Drop a token the acceptor no longer needs to track (e.g. the
    /// connection closed before an identity resolved).
    pub fn forget(&self, token: usize) {
        self.pending.remove(&token);
    }

    /// Feed newly-received bytes for a still-pending token and attempt to
    /// resolve its identity.
    pub fn on_data(&self, token: usize, bytes: &[u8]) -> AcceptorAction {
        let Some(mut entry) = self.pending.get_mut(&token) else {
            return AcceptorAction::NeedMore;
        };
        entry.buf.extend_from_slice(bytes);
        if entry.buf.len() > self.max_pending_bytes {
            drop(entry);
            self.pending.remove(&token);
            return AcceptorAction::Overflow;
        }

        match self.protocol {
            AcceptorProtocol::Fix => self.resolve_fix(token, &mut entry),
            AcceptorProtocol::SoupBinTcp => self.resolve_soupbin(token, &mut entry),
        }
    }

    fn resolve_fix(&self, token: usize, entry: &mut PendingConnection) -> AcceptorAction {
        let Some((their_sender, their_target)) = fix::scan_identity(&entry.buf) else {
            return AcceptorAction::NeedMore;
        };
        let key = RouteKey::Fix {
            their_sender: their_sender.clone(),
            their_target: their_target.clone(),
            port: self.port,
        };
        match self.lookup(&key) {
            Some(sink) => {
                self.bind(token, sink);
                AcceptorAction::Bound
            }
            None => {
                let reject = FixMessageBuilder::new("FIX.4.4", "5")
                    .field(49, their_target)
                    .field(56, their_sender)
                    .field(
                        58,
                        format!("unrecognized session on port {}", self.port),
                    )
                    .build();
                let outcome = Self::write_raw(&entry.ring, &reject);
                self.pending.remove(&token);
                if outcome.is_err() {
                    logging::warn!("[acceptor] failed to commit rejection Logout for token {token}");
                }
                AcceptorAction::Rejected
            }
        }
    }

    fn resolve_soupbin(&self, token: usize, entry: &mut PendingConnection) -> AcceptorAction {
        let mut decoder = binary::soupbin::Decoder::default();
        decoder.feed(&entry.buf);
        let parsed = match decoder.try_parse() {
            Ok(Some((ty, payload))) if ty == binary::soupbin::TYPE_LOGIN_REQUEST => payload,
            Ok(Some(_)) => {
                // Some other packet arrived before login; not our problem to
                // interpret, just keep buffering until a login request shows up
                // or the prefix bound trips.
                return AcceptorAction::NeedMore;
            }
            Ok(None) => return AcceptorAction::NeedMore,
            Err(_) => {
                self.pending.remove(&token);
                return AcceptorAction::Rejected;
            }
        };

        let login = match binary::soupbin::LoginRequest::parse(&payload) {
            Ok(login) => login,
            Err(_) => {
                self.pending.remove(&token);
                return AcceptorAction::Rejected;
            }
        };

        let key = RouteKey::Username {
            username: login.username.trim().to_string(),
            port: self.port,
        };
        match self.lookup(&key) {
            Some(sink) => {
                self.bind(token, sink);
                AcceptorAction::Bound
            }
            None => {
                self.pending.remove(&token);
                AcceptorAction::Rejected
            }
        }
    }

    fn lookup(&self, key: &RouteKey) -> Option<Arc<dyn SessionSink>> {
        if let Some(sink) = self.routes.get(key) {
            return Some(sink.clone());
        }
        self.single_route.get(&()).map(|entry| entry.value().1.clone())
    }

    fn bind(&self, token: usize, sink: Arc<dyn SessionSink>) {
        if let Some((_, conn)) = self.pending.remove(&token) {
            sink.on_connected(MatchedConnection {
                token,
                remote_addr: conn.remote_addr,
                ring: conn.ring,
                buffered_prefix: conn.buf,
            });
        }
    }

    fn write_raw(ring: &Ring, bytes: &[u8]) -> Result<()> {
        let claim = ring.try_claim(bytes.len())?;
        ring.write_claim(&claim, bytes);
        ring.commit(claim);
        Ok(())
    }
}

/// Build the inverted route a session registers under: its own
/// `SenderCompID`/`TargetCompID` flip to become the counterparty's expected
/// `TargetCompID`/`SenderCompID`.
#[must_use]
pub fn fix_route_for_session(our_sender: &str, our_target: &str, port: u16) -> RouteKey {
    RouteKey::Fix {
        their_sender: our_target.to_string(),
        their_target: our_sender.to_string(),
        port,
    }
}

#[must_use]
pub fn username_route_for_session(username: &str, port: u16) -> RouteKey {
    RouteKey::Username {
        username: username.to_string(),
        port,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<(usize, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    impl SessionSink for RecordingSink {
        fn on_connected(&self, matched: MatchedConnection) {
            self.calls.lock().unwrap().push((matched.token, matched.buffered_prefix));
        }
    }

    fn ring() -> Arc<Ring> {
        Arc::new(Ring::with_capacity(4096))
    }

    #[test]
    fn fix_identity_match_replays_buffered_prefix() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        let sink = Arc::new(RecordingSink::new());
        acceptor.register_route(fix_route_for_session("US", "BROKER", 9001), sink.clone());

        acceptor.on_accepted(1, "127.0.0.1:4000".parse().unwrap(), ring());
        let msg = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "BROKER")
            .field(56, "US")
            .build();
        let action = acceptor.on_data(1, &msg);

        assert_eq!(action, AcceptorAction::Bound);
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 1);
        assert_eq!(calls[0].1, msg);
        assert_eq!(acceptor.pending_count(), 0);
    }

    #[test]
    fn fix_identity_mismatch_rejects_with_logout() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        let sink = Arc::new(RecordingSink::new());
        acceptor.register_route(fix_route_for_session("US", "BROKER", 9001), sink);

        let r = ring();
        acceptor.on_accepted(2, "127.0.0.1:4001".parse().unwrap(), r.clone());
        let msg = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "STRANGER")
            .field(56, "US")
            .build();
        let action = acceptor.on_data(2, &msg);

        assert_eq!(action, AcceptorAction::Rejected);
        assert!(r.len() > 0, "rejection Logout should have been committed");
    }

    #[test]
    fn fix_waits_for_more_bytes_before_identity_known() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        acceptor.on_accepted(3, "127.0.0.1:4002".parse().unwrap(), ring());
        let action = acceptor.on_data(3, b"8=FIX.4.4\x019=12\x01");
        assert_eq!(action, AcceptorAction::NeedMore);
        assert_eq!(acceptor.pending_count(), 1);
    }

    #[test]
    fn single_registered_route_is_a_fallback_for_unknown_identity() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        let sink = Arc::new(RecordingSink::new());
        acceptor.register_route(fix_route_for_session("US", "BROKER", 9001), sink.clone());

        acceptor.on_accepted(4, "127.0.0.1:4003".parse().unwrap(), ring());
        let msg = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "ANYONE")
            .field(56, "US")
            .build();
        let action = acceptor.on_data(4, &msg);

        assert_eq!(action, AcceptorAction::Bound);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn second_route_disables_single_session_fallback() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        let sink_a = Arc::new(RecordingSink::new());
        let sink_b = Arc::new(RecordingSink::new());
        acceptor.register_route(fix_route_for_session("US", "BROKER_A", 9001), sink_a);
        acceptor.register_route(fix_route_for_session("US", "BROKER_B", 9001), sink_b);

        acceptor.on_accepted(5, "127.0.0.1:4004".parse().unwrap(), ring());
        let msg = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "NOBODY_REGISTERED")
            .field(56, "US")
            .build();
        let action = acceptor.on_data(5, &msg);
        assert_eq!(action, AcceptorAction::Rejected);
    }

    #[test]
    fn oversized_unresolved_prefix_overflows() {
        let acceptor = Acceptor::with_max_pending_bytes(AcceptorProtocol::Fix, 9001, 16);
        acceptor.on_accepted(6, "127.0.0.1:4005".parse().unwrap(), ring());
        let action = acceptor.on_data(6, &[b'x'; 64]);
        assert_eq!(action, AcceptorAction::Overflow);
        assert_eq!(acceptor.pending_count(), 0);
    }

    #[test]
    fn soupbin_username_match_binds_and_replays() {
        let acceptor = Acceptor::new(AcceptorProtocol::SoupBinTcp, 9002);
        let sink = Arc::new(RecordingSink::new());
        acceptor.register_route(username_route_for_session("TRADER1", 9002), sink.clone());

        acceptor.on_accepted(7, "127.0.0.1:4006".parse().unwrap(), ring());
        let login = binary::soupbin::LoginRequest {
            username: "TRADER1".into(),
            password: "secret".into(),
            session: String::new(),
            sequence_number: 1,
        };
        let packet = binary::soupbin::encode_packet(binary::soupbin::TYPE_LOGIN_REQUEST, &login.encode());
        let action = acceptor.on_data(7, &packet);

        assert_eq!(action, AcceptorAction::Bound);
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn soupbin_unknown_username_closes_without_writing() {
        let acceptor = Acceptor::new(AcceptorProtocol::SoupBinTcp, 9002);
        let sink = Arc::new(RecordingSink::new());
        acceptor.register_route(username_route_for_session("TRADER1", 9002), sink);
        acceptor.register_route(username_route_for_session("TRADER2", 9002), Arc::new(RecordingSink::new()));

        let r = ring();
        acceptor.on_accepted(8, "127.0.0.1:4007".parse().unwrap(), r.clone());
        let login = binary::soupbin::LoginRequest {
            username: "NOBODY".into(),
            password: String::new(),
            session: String::new(),
            sequence_number: 0,
        };
        let packet = binary::soupbin::encode_packet(binary::soupbin::TYPE_LOGIN_REQUEST, &login.encode());
        let action = acceptor.on_data(8, &packet);

        assert_eq!(action, AcceptorAction::Rejected);
        assert_eq!(r.len(), 0, "SoupBinTCP rejection must not write anything");
    }

    #[test]
    fn forget_drops_pending_token() {
        let acceptor = Acceptor::new(AcceptorProtocol::Fix, 9001);
        acceptor.on_accepted(9, "127.0.0.1:4008".parse().unwrap(), ring());
        assert_eq!(acceptor.pending_count(), 1);
        acceptor.forget(9);
        assert_eq!(acceptor.pending_count(), 0);
    }
}
