// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection session state machine: logon, heartbeat, sequence
//! tracking, resend, logout, and end-of-day reset.
//!
//! A [`Session`] owns the protocol-level conversation on top of one bound
//! connection. It never touches a socket directly: inbound bytes arrive via
//! [`Session::on_data`] (called from the event-loop thread once a connection
//! is bound, by the acceptor or by an initiator's connect path) and outbound
//! bytes leave via the connection's [`Ring`] handle, which is safe to claim
//! into from any thread.
//!
//! State mutation (`state`, sequence counters used for gap detection, the
//! decoder) is only ever touched from the thread driving `on_data`/`tick`,
//! matching the engine's single-writer-per-session rule. Outbound sequence
//! assignment is the one exception: [`SeqNumGenerator`] is atomic so
//! application threads may call [`Session::send_app_message`] concurrently
//! with the I/O thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::config::{ProtocolKind, SessionConfig, SessionRole};
use crate::error::{Error, Result};
use crate::logging;
use crate::persistence::{Direction, Store};
use crate::protocol::binary;
use crate::protocol::fix::{FixDecoder, FixMessage, FixMessageBuilder};
use crate::reliability::{GapTracker, SeqNumGenerator, SeqRange};
use crate::ring::Ring;

/// Superset of states across wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    /// Binary-protocol equivalent of `LogonSent`/`LogonReceived`.
    Negotiating,
    /// Binary-protocol equivalent of `LoggedOn`.
    Establishing,
    LogonSent,
    LogonReceived,
    /// Alias: `Established`.
    LoggedOn,
    LogoutSent,
    LogoutReceived,
    Disconnected,
    Stopped,
}

impl SessionState {
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self, SessionState::LoggedOn | SessionState::Establishing)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Stopped)
    }
}

/// Events that may legally cause a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    TcpConnected,
    TcpFailed,
    TcpClosed,
    LogonSent,
    LogonReceived,
    LogoutSent,
    LogoutReceived,
    HeartbeatTimeout,
    SequenceGap,
    Reset,
    Stop,
}

fn next_state(current: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;
    Some(match (current, event) {
        (S::Created, E::TcpConnected) => S::Connected,
        (S::Connecting, E::TcpConnected) => S::Connected,
        (S::Connecting, E::TcpFailed) => S::Disconnected,
        (S::Connected, E::LogonSent) => S::LogonSent,
        (S::Connected, E::LogonReceived) => S::LogonReceived,
        (S::LogonSent, E::LogonReceived) => S::LoggedOn,
        (S::LogonReceived, E::LogonSent) => S::LoggedOn,
        (S::LoggedOn, E::LogoutSent) => S::LogoutSent,
        (S::LoggedOn, E::LogoutReceived) => S::LogoutReceived,
        (S::LogoutSent, E::LogoutReceived) => S::Disconnected,
        (S::LogoutReceived, E::LogoutSent) => S::Disconnected,
        (_, E::TcpClosed) => S::Disconnected,
        (_, E::HeartbeatTimeout) => S::Disconnected,
        (S::LoggedOn, E::SequenceGap) => S::LoggedOn, // resend request, no state change
        (_, E::Reset) => S::Created,
        (_, E::Stop) => S::Stopped,
        _ => return None,
    })
}

/// Notified of state changes and inbound application messages. The engine
/// implements this once and fans out to its own listener registry; a
/// session only ever talks to one observer.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, session_id: &str, from: SessionState, to: SessionState);
    fn on_message(&self, session_id: &str, raw: &[u8]);
}

/// An observer that does nothing; useful for tests and standalone sessions.
pub struct NullObserver;
impl SessionObserver for NullObserver {
    fn on_state_changed(&self, _session_id: &str, _from: SessionState, _to: SessionState) {}
    fn on_message(&self, _session_id: &str, _raw: &[u8]) {}
}

enum Decoder {
    Fix(FixDecoder),
    SoupBin(binary::soupbin::Decoder),
    Pillar(binary::pillar::Decoder),
}

/// FIX admin `MsgType` values this layer interprets itself.
mod msg_type {
    pub const HEARTBEAT: &str = "0";
    pub const TEST_REQUEST: &str = "1";
    pub const RESEND_REQUEST: &str = "2";
    pub const REJECT: &str = "3";
    pub const SEQUENCE_RESET: &str = "4";
    pub const LOGOUT: &str = "5";
    pub const LOGON: &str = "A";
}

fn is_admin_msg_type(t: &str) -> bool {
    matches!(
        t,
        msg_type::HEARTBEAT
            | msg_type::TEST_REQUEST
            | msg_type::RESEND_REQUEST
            | msg_type::REJECT
            | msg_type::SEQUENCE_RESET
            | msg_type::LOGOUT
            | msg_type::LOGON
    )
}

/// Per-connection session state machine.
pub struct Session {
    config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    store: Option<Arc<Store>>,

    state: SessionState,
    ring: Option<Arc<Ring>>,
    decoder: Decoder,

    next_outbound: SeqNumGenerator,
    expected_inbound: AtomicU64,
    /// Tracks pending gap ranges for diagnostics and resend bookkeeping;
    /// `expected_inbound` remains the authoritative next-expected counter.
    gap_tracker: GapTracker,
    resend_in_progress: bool,

    logon_sent_at: Option<Instant>,
    last_outbound_at: Instant,
    last_inbound_at: Instant,
    test_request_sent: bool,

    last_reset_day: Option<chrono::NaiveDate>,
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig, observer: Arc<dyn SessionObserver>, store: Option<Arc<Store>>) -> Self {
        let decoder = match config.protocol {
            ProtocolKind::Fix => Decoder::Fix(FixDecoder::new(config.max_message_length)),
            ProtocolKind::Ouch => Decoder::SoupBin(binary::soupbin::Decoder::new()),
            ProtocolKind::Pillar | ProtocolKind::Sbe => Decoder::Pillar(binary::pillar::Decoder::new()),
        };
        Self {
            config,
            observer,
            store,
            state: SessionState::Created,
            ring: None,
            decoder,
            next_outbound: SeqNumGenerator::new(),
            expected_inbound: AtomicU64::new(1),
            gap_tracker: GapTracker::new(),
            resend_in_progress: false,
            logon_sent_at: None,
            last_outbound_at: Instant::now(),
            last_inbound_at: Instant::now(),
            test_request_sent: false,
            last_reset_day: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn transition(&mut self, event: SessionEvent) -> Result<()> {
        match next_state(self.state, event) {
            Some(to) => {
                let from = self.state;
                self.state = to;
                self.observer.on_state_changed(self.id(), from, to);
                Ok(())
            }
            None => Err(Error::InvalidState {
                from: "session",
                event: match event {
                    SessionEvent::TcpConnected => "tcp_connected",
                    SessionEvent::TcpFailed => "tcp_failed",
                    SessionEvent::TcpClosed => "tcp_closed",
                    SessionEvent::LogonSent => "logon_sent",
                    SessionEvent::LogonReceived => "logon_received",
                    SessionEvent::LogoutSent => "logout_sent",
                    SessionEvent::LogoutReceived => "logout_received",
                    SessionEvent::HeartbeatTimeout => "heartbeat_timeout",
                    SessionEvent::SequenceGap => "sequence_gap",
                    SessionEvent::Reset => "reset",
                    SessionEvent::Stop => "stop",
                },
            }),
        }
    }

    /// Bind a freshly connected or accepted channel, optionally replaying a
    /// prefix buffered by the acceptor while it sniffed the identity.
    pub fn bind(&mut self, ring: Arc<Ring>, buffered_prefix: Vec<u8>) -> Result<()> {
        self.ring = Some(ring);
        self.transition(SessionEvent::TcpConnected)?;
        if self.config.role == SessionRole::Initiator {
            self.send_logon()?;
        }
        if !buffered_prefix.is_empty() {
            self.on_data(&buffered_prefix)?;
        }
        Ok(())
    }

    fn ring(&self) -> Result<&Ring> {
        self.ring.as_deref().ok_or(Error::InvalidState {
            from: "session",
            event: "send_before_bind",
        })
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let ring = self.ring()?;
        let claim = ring.try_claim(bytes.len())?;
        ring.write_claim(&claim, bytes);
        ring.commit(claim);
        Ok(())
    }

    fn persist(&self, direction: Direction, raw: &[u8], metadata: Vec<u8>) {
        let Some(store) = &self.store else { return };
        if !self.config.persistence.enabled {
            return;
        }
        let stream = match direction {
            Direction::Outbound => format!("{}.out", self.config.session_id),
            Direction::Inbound => format!("{}.in", self.config.session_id),
        };
        let timestamp_ms = Utc::now().timestamp_millis().max(0) as u64;
        if let Err(e) = store.append(&stream, timestamp_ms, direction, metadata, raw.to_vec()) {
            logging::error!("[session {}] persistence write failed: {}", self.config.session_id, e);
        }
    }

    fn fix_timestamp() -> String {
        Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
    }

    fn build_admin(&self, msg_type: &str, extra: Vec<(u32, String)>) -> FixMessageBuilder {
        let seq = self.next_outbound.next();
        let mut b = FixMessageBuilder::new(
            self.config.fix_version.clone().unwrap_or_else(|| "FIX.4.4".to_string()),
            msg_type,
        )
        .field(49, self.config.sender_id.clone())
        .field(56, self.config.target_id.clone())
        .field(34, seq.to_string())
        .field(52, Self::fix_timestamp());
        for (tag, value) in extra {
            b = b.field(tag, value);
        }
        b
    }

    fn send_fix_admin(&mut self, msg_type: &str, extra: Vec<(u32, String)>, is_app: bool) -> Result<()> {
        let builder = self.build_admin(msg_type, extra);
        let bytes = builder.build();
        self.write_raw(&bytes)?;
        self.persist(Direction::Outbound, &bytes, vec![u8::from(is_app)]);
        self.last_outbound_at = Instant::now();
        Ok(())
    }

    pub fn send_logon(&mut self) -> Result<()> {
        let heartbeat_secs = self.config.heartbeat_interval.as_secs().to_string();
        let mut extra = vec![(108, heartbeat_secs)];
        if self.config.reset_on_logon {
            extra.push((141, "Y".to_string()));
        }
        match self.config.protocol {
            ProtocolKind::Fix => {
                self.send_fix_admin(msg_type::LOGON, extra, false)?;
                self.logon_sent_at = Some(Instant::now());
                self.transition(SessionEvent::LogonSent)
            }
            _ => {
                let login = binary::soupbin::LoginRequest {
                    username: self.config.sender_id.clone(),
                    password: String::new(),
                    session: self.config.session_id.clone(),
                    sequence_number: self.next_outbound.current(),
                };
                let packet = binary::soupbin::encode_packet(binary::soupbin::TYPE_LOGIN_REQUEST, &login.encode());
                self.write_raw(&packet)?;
                self.logon_sent_at = Some(Instant::now());
                self.transition(SessionEvent::LogonSent)
            }
        }
    }

    pub fn send_logout(&mut self, text: &str) -> Result<()> {
        match self.config.protocol {
            ProtocolKind::Fix => {
                self.send_fix_admin(msg_type::LOGOUT, vec![(58, text.to_string())], false)?;
            }
            _ => {
                let packet = binary::soupbin::encode_packet(binary::soupbin::TYPE_LOGOUT_REQUEST, &[]);
                self.write_raw(&packet)?;
            }
        }
        self.transition(SessionEvent::LogoutSent)
    }

    fn send_heartbeat(&mut self, test_req_id: Option<&str>) -> Result<()> {
        match self.config.protocol {
            ProtocolKind::Fix => {
                let extra = test_req_id.map(|id| vec![(112, id.to_string())]).unwrap_or_default();
                self.send_fix_admin(msg_type::HEARTBEAT, extra, false)
            }
            _ => {
                let packet = binary::soupbin::encode_packet(binary::soupbin::TYPE_CLIENT_HEARTBEAT, &[]);
                self.write_raw(&packet)
            }
        }
    }

    fn send_test_request(&mut self, id: &str) -> Result<()> {
        self.send_fix_admin(msg_type::TEST_REQUEST, vec![(112, id.to_string())], false)
    }

    /// Encode and send one application message, assigning it the next
    /// outbound sequence number. Safe to call from any thread.
    pub fn send_app_message(&self, msg_type: &str, fields: Vec<(u32, String)>) -> Result<()> {
        if !self.state.is_established() {
            return Err(Error::InvalidState {
                from: "session",
                event: "send_app_message_not_established",
            });
        }
        let seq = self.next_outbound.next();
        let mut builder = FixMessageBuilder::new(
            self.config.fix_version.clone().unwrap_or_else(|| "FIX.4.4".to_string()),
            msg_type,
        )
        .field(49, self.config.sender_id.clone())
        .field(56, self.config.target_id.clone())
        .field(34, seq.to_string())
        .field(52, Self::fix_timestamp());
        for (tag, value) in fields {
            builder = builder.field(tag, value);
        }
        let bytes = builder.build();
        self.write_raw(&bytes)?;
        self.persist(Direction::Outbound, &bytes, vec![1]);
        Ok(())
    }

    /// Feed newly-received bytes and process every complete message found.
    ///
    /// Decoding and dispatch are split into two matches so the `&mut
    /// self.decoder` borrow never overlaps the `&mut self` handler calls
    /// (the decoded value is owned, not a view into the decoder).
    pub fn on_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.last_inbound_at = Instant::now();
        match &mut self.decoder {
            Decoder::Fix(decoder) => decoder.feed(bytes),
            Decoder::SoupBin(decoder) => decoder.feed(bytes),
            Decoder::Pillar(decoder) => decoder.feed(bytes),
        }

        loop {
            enum Parsed {
                Fix(FixMessage),
                SoupBin(u8, Vec<u8>),
                Pillar(u16, Vec<u8>),
            }

            let parsed = match &mut self.decoder {
                Decoder::Fix(decoder) => match decoder.try_parse() {
                    Ok(Some(msg)) => Some(Parsed::Fix(msg)),
                    Ok(None) => None,
                    Err(e) => {
                        logging::warn!("[session {}] FIX parse error: {}", self.config.session_id, e);
                        None
                    }
                },
                Decoder::SoupBin(decoder) => decoder
                    .try_parse()
                    .map_err(|e| {
                        logging::warn!("[session {}] SoupBinTCP parse error: {}", self.config.session_id, e);
                        e
                    })?
                    .map(|(ty, payload)| Parsed::SoupBin(ty, payload)),
                Decoder::Pillar(decoder) => decoder.try_parse()?.map(|(ty, body)| Parsed::Pillar(ty, body)),
            };

            match parsed {
                Some(Parsed::Fix(msg)) => self.handle_fix_message(msg)?,
                Some(Parsed::SoupBin(ty, payload)) => self.handle_soupbin_message(ty, payload)?,
                Some(Parsed::Pillar(_ty, body)) => self.observer.on_message(self.id(), &body),
                None => break,
            }
        }
        Ok(())
    }

    fn handle_soupbin_message(&mut self, ty: u8, payload: Vec<u8>) -> Result<()> {
        use binary::soupbin as sb;
        match ty {
            t if t == sb::TYPE_LOGIN_ACCEPTED => self.transition(SessionEvent::LogonReceived),
            t if t == sb::TYPE_LOGIN_REJECTED => {
                self.transition(SessionEvent::TcpFailed)?;
                Err(Error::LogonFailed("login rejected".into()))
            }
            t if t == sb::TYPE_LOGIN_REQUEST => {
                let login = sb::LoginRequest::parse(&payload)?;
                let _ = login;
                let accept = sb::encode_packet(sb::TYPE_LOGIN_ACCEPTED, &[]);
                self.write_raw(&accept)?;
                self.transition(SessionEvent::LogonSent)?;
                self.transition(SessionEvent::LogonReceived)
            }
            t if t == sb::TYPE_SERVER_HEARTBEAT || t == sb::TYPE_CLIENT_HEARTBEAT => Ok(()),
            t if t == sb::TYPE_LOGOUT_REQUEST || t == sb::TYPE_END_OF_SESSION => {
                self.transition(SessionEvent::LogoutReceived)
            }
            _ => {
                self.observer.on_message(self.id(), &payload);
                Ok(())
            }
        }
    }

    fn handle_fix_message(&mut self, msg: FixMessage) -> Result<()> {
        let seq = msg.msg_seq_num().unwrap_or(0);
        let expected = self.expected_inbound.load(Ordering::Relaxed);
        let msg_type = msg.msg_type().unwrap_or("").to_string();
        self.gap_tracker.on_receive(seq);

        if seq < expected {
            if msg.poss_dup() {
                // Accepted silently, no counter advance.
            } else {
                self.transition(SessionEvent::TcpClosed)?;
                return Err(Error::SequenceLow { expected, received: seq });
            }
        } else if seq > expected {
            if is_admin_msg_type(&msg_type) {
                self.expected_inbound.store(seq + 1, Ordering::Relaxed);
            } else {
                self.transition(SessionEvent::SequenceGap)?;
                self.send_fix_admin(
                    msg_type::RESEND_REQUEST,
                    vec![(7, expected.to_string()), (16, (seq - 1).to_string())],
                    false,
                )?;
                self.expected_inbound.store(seq + 1, Ordering::Relaxed);
                return Err(Error::SequenceGap { expected, received: seq });
            }
        } else {
            self.expected_inbound.store(expected + 1, Ordering::Relaxed);
        }

        self.persist(Direction::Inbound, msg.raw(), vec![u8::from(!is_admin_msg_type(&msg_type))]);

        match msg_type.as_str() {
            msg_type::LOGON => {
                if self.config.role == SessionRole::Acceptor && self.state == SessionState::Connected {
                    self.send_logon()?;
                }
                self.transition(SessionEvent::LogonReceived)
            }
            msg_type::HEARTBEAT => Ok(()),
            msg_type::TEST_REQUEST => {
                let id = msg.get(112).unwrap_or("").to_string();
                self.send_heartbeat(Some(&id))
            }
            msg_type::RESEND_REQUEST => {
                let begin: u64 = msg.get_u64(7).unwrap_or(1);
                let end: u64 = msg.get_u64(16).unwrap_or(0);
                self.handle_resend_request(begin, end)
            }
            msg_type::LOGOUT => self.transition(SessionEvent::LogoutReceived),
            msg_type::SEQUENCE_RESET => Ok(()),
            msg_type::REJECT => Ok(()),
            _ => {
                self.observer.on_message(self.id(), msg.raw());
                Ok(())
            }
        }
    }

    /// Walk the persisted outbound stream for `[begin, end]` (`end == 0`
    /// meaning through the most recently sent message) and resend. App
    /// messages are resent verbatim with `PossDupFlag=Y`; contiguous admin
    /// runs collapse into one `SequenceReset-GapFill`.
    pub fn handle_resend_request(&mut self, begin: u64, end: u64) -> Result<()> {
        if self.resend_in_progress {
            logging::warn!("[session {}] resend already in progress, dropping overlapping request", self.config.session_id);
            return Ok(());
        }
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        if !self.config.persistence.enabled {
            return Ok(());
        }
        self.resend_in_progress = true;
        let stream = format!("{}.out", self.config.session_id);
        let mut gap_start: Option<u64> = None;
        let mut result = Ok(());
        let to_seq = end as u32; // 0 means unbounded, matching Store::replay's convention
        store
            .replay(&stream, Some(Direction::Outbound), begin as u32, to_seq, |record| {
                let is_app = record.metadata.first() == Some(&1);
                if is_app {
                    if let Some(start) = gap_start.take() {
                        if let Err(e) = self.emit_gap_fill(start, u64::from(record.seqnum)) {
                            result = Err(e);
                            return false;
                        }
                    }
                    if let Err(e) = self.resend_app_message(&record.raw) {
                        result = Err(e);
                        return false;
                    }
                } else if gap_start.is_none() {
                    gap_start = Some(u64::from(record.seqnum));
                }
                true
            })
            .map_err(|e| Error::Persistence(e.to_string()))?;
        if result.is_ok() {
            if let Some(start) = gap_start.take() {
                let end_exclusive = if end == 0 { self.next_outbound.current() } else { end + 1 };
                result = self.emit_gap_fill(start, end_exclusive);
            }
        }
        if result.is_ok() && end > begin {
            self.gap_tracker.mark_filled(SeqRange::new(begin, end + 1));
        }
        self.resend_in_progress = false;
        result
    }

    fn emit_gap_fill(&mut self, begin: u64, new_seq_no: u64) -> Result<()> {
        let builder = FixMessageBuilder::new(
            self.config.fix_version.clone().unwrap_or_else(|| "FIX.4.4".to_string()),
            msg_type::SEQUENCE_RESET,
        )
        .field(49, self.config.sender_id.clone())
        .field(56, self.config.target_id.clone())
        .field(34, begin.to_string())
        .field(52, Self::fix_timestamp())
        .field(123, "Y")
        .field(36, new_seq_no.to_string());
        let bytes = builder.build();
        self.write_raw(&bytes)
    }

    fn resend_app_message(&mut self, original_raw: &[u8]) -> Result<()> {
        let mut decoder = FixDecoder::new(self.config.max_message_length);
        decoder.feed(original_raw);
        let Some(original) = decoder.try_parse()? else {
            return Ok(());
        };
        let seq = original.msg_seq_num().unwrap_or(0);
        let orig_sending_time = original.get(52).unwrap_or("").to_string();
        let msg_type = original.msg_type().unwrap_or("").to_string();

        let mut builder = FixMessageBuilder::new(
            self.config.fix_version.clone().unwrap_or_else(|| "FIX.4.4".to_string()),
            msg_type,
        )
        .field(49, self.config.sender_id.clone())
        .field(56, self.config.target_id.clone())
        .field(34, seq.to_string())
        .field(52, Self::fix_timestamp())
        .field(43, "Y")
        .field(122, orig_sending_time);
        builder = builder.field(58, "resent by request".to_string());
        let bytes = builder.build();
        self.write_raw(&bytes)
    }

    /// One-second heartbeat/logon-timeout tick, driven by the scheduler.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if let Some(sent_at) = self.logon_sent_at {
            if !self.state.is_established() && now.duration_since(sent_at) > Duration::from_secs(30) {
                self.transition(SessionEvent::HeartbeatTimeout)?;
                return Err(Error::LogonFailed("logon timed out after 30s".into()));
            }
        }
        if !self.state.is_established() {
            return Ok(());
        }

        let hb = self.config.heartbeat_interval;
        if now.duration_since(self.last_outbound_at) >= hb {
            self.send_heartbeat(None)?;
        }

        let grace = hb + hb.mul_f64(0.2);
        if now.duration_since(self.last_inbound_at) >= grace {
            if self.test_request_sent {
                self.transition(SessionEvent::HeartbeatTimeout)?;
                return Err(Error::LogonFailed("no response to TestRequest".into()));
            }
            self.send_test_request(&format!("TR-{}", self.next_outbound.current()))?;
            self.test_request_sent = true;
        } else {
            self.test_request_sent = false;
        }
        Ok(())
    }

    /// Quiesce the session and reset both sequence counters to 1, persisting
    /// an `EOD` marker recording the previous values and the trigger.
    pub fn reset_for_eod(&mut self, trigger: &str) -> Result<()> {
        let prev_out = self.next_outbound.current();
        let prev_in = self.expected_inbound.load(Ordering::Relaxed);
        self.next_outbound = SeqNumGenerator::new();
        self.expected_inbound.store(1, Ordering::Relaxed);

        let metadata = format!("trigger={trigger};prev_out={prev_out};prev_in={prev_in}").into_bytes();
        self.persist(Direction::Outbound, &[], metadata);
        self.last_reset_day = Some(Utc::now().date_naive());
        self.transition(SessionEvent::Reset)
    }

    #[must_use]
    pub fn already_reset_today(&self) -> bool {
        self.last_reset_day == Some(Utc::now().date_naive())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.ring = None;
        self.transition(SessionEvent::TcpClosed)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.transition(SessionEvent::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, PersistenceConfig, TlsSettings};
    use std::sync::Mutex;

    struct RecordingObserver {
        states: Mutex<Vec<(SessionState, SessionState)>>,
        messages: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingObserver {
        fn new() -> Self {
            Self { states: Mutex::new(Vec::new()), messages: Mutex::new(Vec::new()) }
        }
    }

    impl SessionObserver for RecordingObserver {
        fn on_state_changed(&self, _id: &str, from: SessionState, to: SessionState) {
            self.states.lock().unwrap().push((from, to));
        }
        fn on_message(&self, _id: &str, raw: &[u8]) {
            self.messages.lock().unwrap().push(raw.to_vec());
        }
    }

    fn fix_config(role: SessionRole) -> SessionConfig {
        SessionConfig {
            session_id: "TEST".into(),
            protocol: ProtocolKind::Fix,
            role,
            sender_id: "US".into(),
            target_id: "THEM".into(),
            host: "127.0.0.1".into(),
            port: 9001,
            heartbeat_interval: Duration::from_secs(30),
            reset_on_logon: false,
            reset_on_logout: false,
            reset_on_disconnect: false,
            reset_on_eod: true,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            schedule: None,
            max_message_length: 8192,
            max_tag_number: 10_000,
            fix_version: Some("FIX.4.4".into()),
            default_appl_ver_id: None,
            tls: TlsSettings::default(),
            network: NetworkConfig::default(),
            persistence: PersistenceConfig { enabled: false, ..PersistenceConfig::default() },
        }
    }

    fn ring() -> Arc<Ring> {
        Arc::new(Ring::with_capacity(65536))
    }

    fn drain_text(ring: &Ring) -> Vec<u8> {
        let mut out = Vec::new();
        ring.controlled_read(|payload| {
            out.extend_from_slice(payload);
            crate::ring::ReadAction::Continue
        });
        out
    }

    #[test]
    fn initiator_sends_logon_on_bind() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Initiator), observer, None);
        let r = ring();
        session.bind(r.clone(), Vec::new()).unwrap();
        assert_eq!(session.state(), SessionState::LogonSent);
        let sent = drain_text(&r);
        assert!(String::from_utf8_lossy(&sent).contains("35=A"));
    }

    #[test]
    fn logon_exchange_reaches_logged_on() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Initiator), observer, None);
        session.bind(ring(), Vec::new()).unwrap();

        let counterparty_logon = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "1")
            .field(52, "20260101-00:00:00.000")
            .field(108, "30")
            .build();
        session.on_data(&counterparty_logon).unwrap();
        assert_eq!(session.state(), SessionState::LoggedOn);
    }

    #[test]
    fn in_order_app_message_advances_expected_and_delivers() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Acceptor), observer.clone(), None);
        session.bind(ring(), Vec::new()).unwrap();

        let logon = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "1")
            .field(52, "20260101-00:00:00.000")
            .build();
        session.on_data(&logon).unwrap();
        assert_eq!(session.state(), SessionState::LoggedOn);

        let order = FixMessageBuilder::new("FIX.4.4", "D")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "2")
            .field(52, "20260101-00:00:01.000")
            .build();
        session.on_data(&order).unwrap();
        assert_eq!(observer.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn sequence_gap_triggers_resend_request() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Acceptor), observer, None);
        let r = ring();
        session.bind(r.clone(), Vec::new()).unwrap();

        let logon = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "1")
            .field(52, "20260101-00:00:00.000")
            .build();
        session.on_data(&logon).unwrap();
        drain_text(&r); // discard the logon reply

        let jump = FixMessageBuilder::new("FIX.4.4", "D")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "5")
            .field(52, "20260101-00:00:01.000")
            .build();
        let result = session.on_data(&jump);
        assert!(matches!(result, Err(Error::SequenceGap { .. })));
        let sent = drain_text(&r);
        assert!(String::from_utf8_lossy(&sent).contains("35=2"));
    }

    #[test]
    fn low_sequence_without_poss_dup_disconnects() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Acceptor), observer, None);
        session.bind(ring(), Vec::new()).unwrap();

        let logon = FixMessageBuilder::new("FIX.4.4", "A")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "1")
            .field(52, "20260101-00:00:00.000")
            .build();
        session.on_data(&logon).unwrap();

        let stale = FixMessageBuilder::new("FIX.4.4", "D")
            .field(49, "THEM")
            .field(56, "US")
            .field(34, "1")
            .field(52, "20260101-00:00:01.000")
            .build();
        let result = session.on_data(&stale);
        assert!(matches!(result, Err(Error::SequenceLow { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn eod_reset_restarts_both_counters_at_one() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Initiator), observer, None);
        session.bind(ring(), Vec::new()).unwrap();
        let _ = session.next_outbound.next();
        let _ = session.next_outbound.next();

        session.reset_for_eod("scheduled").unwrap();
        assert_eq!(session.next_outbound.current(), 1);
        assert_eq!(session.expected_inbound.load(Ordering::Relaxed), 1);
        assert!(session.already_reset_today());
    }

    #[test]
    fn send_app_message_before_logged_on_is_rejected() {
        let observer = Arc::new(RecordingObserver::new());
        let session = Session::new(fix_config(SessionRole::Initiator), observer, None);
        let result = session.send_app_message("D", vec![(11, "ORDER1".into())]);
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[test]
    fn invalid_transition_is_rejected_without_state_change() {
        let observer = Arc::new(RecordingObserver::new());
        let mut session = Session::new(fix_config(SessionRole::Initiator), observer, None);
        let result = session.transition(SessionEvent::LogoutReceived);
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Created);
    }
}
