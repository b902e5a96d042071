// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Top-level orchestrator: session registry, listener acceptors, initiator
//! dialing, schedule-driven lifecycle, and listener fan-out.
//!
//! One [`Engine`] owns a single [`EventLoop`](crate::net::EventLoop) shared
//! by every session it manages, a port-keyed table of
//! [`Acceptor`](crate::acceptor::Acceptor)s for inbound demuxing, and (if
//! any registered session enables persistence) a single shared
//! [`Store`](crate::persistence::Store). Two background threads drive it:
//!
//! - a **pump thread** that drains [`EventLoopHandle`] events and routes
//!   each one to the session (or acceptor) that owns its connection token;
//! - a **ticker thread** that polls the [`Scheduler`] and calls
//!   [`Session::tick`] on every registered session, once a second.
//!
//! Both threads only ever reach a session through its own `Mutex`, so
//! concurrent ticks and inbound data for the same session serialize without
//! the engine itself taking any global lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::acceptor::{Acceptor, AcceptorAction, AcceptorProtocol, MatchedConnection, SessionSink};
use crate::config::{PersistenceConfig, SessionConfig, SessionRole};
use crate::error::{Error, Result};
use crate::logging;
use crate::net::{EventLoop, EventLoopHandle, LoopEvent, RunMode};
use crate::persistence::{Store, StoreConfig};
use crate::scheduler::{ClockProvider, ScheduleEvent, Scheduler, SystemClock};
use crate::session::{Session, SessionObserver, SessionState};

/// Engine-wide settings: everything that isn't per-session.
#[derive(Clone)]
pub struct EngineConfig {
    pub run_mode: RunMode,
    pub ring_capacity: usize,
    pub net_cpu_affinity: Option<usize>,
    /// Cadence of the ticker thread (heartbeat checks, schedule polling).
    /// The spec calls for one second; tests may shorten it.
    pub tick_interval: Duration,
    /// Lookahead for schedule pre-open/pre-close warnings, if any.
    pub schedule_pre_warning: Option<Duration>,
    /// Grace period `shutdown` waits for in-flight Logouts to complete
    /// before forcing every channel closed.
    pub shutdown_grace: Duration,
    /// Backing store for every session with `persistence.enabled = true`.
    /// Sessions don't each get their own store; streams are namespaced by
    /// session id within this one.
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_mode: RunMode::default(),
            ring_capacity: 256 * 1024,
            net_cpu_affinity: None,
            tick_interval: Duration::from_secs(1),
            schedule_pre_warning: None,
            shutdown_grace: Duration::from_secs(5),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Receives every session state transition the engine observes.
pub trait StateListener: Send + Sync {
    fn on_state_changed(&self, session_id: &str, from: SessionState, to: SessionState);
}

/// Receives every inbound application message the engine delivers.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, session_id: &str, raw: &[u8]);
}

/// Fans a single [`SessionObserver`] callback out to every registered
/// listener, isolating one listener's panic from the rest.
///
/// Copy-on-write: registration clones the current `Vec`, appends, and swaps
/// the whole thing back in, so an in-progress fan-out iterates a stable
/// snapshot (mirrors [`crate::config::RuntimeConfig`]'s schedule swap).
struct EngineObserver {
    state_listeners: ArcSwap<Vec<Arc<dyn StateListener>>>,
    message_listeners: ArcSwap<Vec<Arc<dyn MessageListener>>>,
}

impl EngineObserver {
    fn new() -> Self {
        Self {
            state_listeners: ArcSwap::new(Arc::new(Vec::new())),
            message_listeners: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        let mut next = (**self.state_listeners.load()).clone();
        next.push(listener);
        self.state_listeners.store(Arc::new(next));
    }

    fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        let mut next = (**self.message_listeners.load()).clone();
        next.push(listener);
        self.message_listeners.store(Arc::new(next));
    }
}

impl SessionObserver for EngineObserver {
    fn on_state_changed(&self, session_id: &str, from: SessionState, to: SessionState) {
        for listener in self.state_listeners.load().iter() {
            let listener = listener.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_state_changed(session_id, from, to)));
            if let Err(_panic) = result {
                logging::error!("[engine] state listener panicked handling {session_id} {from:?}->{to:?}");
            }
        }
    }

    fn on_message(&self, session_id: &str, raw: &[u8]) {
        for listener in self.message_listeners.load().iter() {
            let listener = listener.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_message(session_id, raw)));
            if let Err(_panic) = result {
                logging::error!("[engine] message listener panicked handling a message from {session_id}");
            }
        }
    }
}

/// Which side of a connection token a pending byte stream belongs to.
#[derive(Clone)]
enum TokenOwner {
    /// Still being identity-sniffed by the acceptor on this port.
    Pending(u16),
    Bound(String),
}

/// Owns one session's state machine plus the bookkeeping the engine needs
/// to dial, rebind, and reconnect it.
struct SessionHandle {
    session_id: String,
    config: SessionConfig,
    session: Mutex<Session>,
    token: Mutex<Option<usize>>,
    token_owner: Arc<DashMap<usize, TokenOwner>>,
    reconnect_attempts: AtomicU32,
}

impl SessionSink for SessionHandle {
    fn on_connected(&self, matched: MatchedConnection) {
        self.token_owner.insert(matched.token, TokenOwner::Bound(self.session_id.clone()));
        *self.token.lock().unwrap() = Some(matched.token);
        let mut session = self.session.lock().unwrap();
        if let Err(e) = session.bind(matched.ring, matched.buffered_prefix) {
            logging::error!("[engine] bind failed for session {}: {e}", self.session_id);
        }
    }
}

/// Top-level orchestrator handle. Cheaply `Clone`-able; clones share the
/// same registry, event loop, and background threads.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

struct EngineInner {
    config: EngineConfig,
    net: Mutex<EventLoopHandle>,
    store: Option<Arc<Store>>,
    sessions: DashMap<String, Arc<SessionHandle>>,
    acceptors: DashMap<u16, Arc<Acceptor>>,
    token_owner: Arc<DashMap<usize, TokenOwner>>,
    pending_connects: DashMap<usize, String>,
    observer: Arc<EngineObserver>,
    scheduler: Mutex<Scheduler>,
    running: Arc<AtomicBool>,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
    ticker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn ClockProvider>) -> Result<Self> {
        let net = EventLoop::spawn(config.run_mode, config.ring_capacity, config.net_cpu_affinity).map_err(Error::Io)?;

        let store = if config.persistence.enabled {
            let store_config = StoreConfig {
                root: config.persistence.path.clone(),
                max_segment_bytes: config.persistence.max_log_file_size,
            };
            Some(Arc::new(Store::open(store_config)?))
        } else {
            None
        };

        let mut scheduler = Scheduler::new(clock);
        if let Some(lead) = config.schedule_pre_warning {
            scheduler = scheduler.with_pre_warning(lead);
        }

        let inner = Arc::new(EngineInner {
            config,
            net: Mutex::new(net),
            store,
            sessions: DashMap::new(),
            acceptors: DashMap::new(),
            token_owner: Arc::new(DashMap::new()),
            pending_connects: DashMap::new(),
            observer: Arc::new(EngineObserver::new()),
            scheduler: Mutex::new(scheduler),
            running: Arc::new(AtomicBool::new(true)),
            pump_thread: Mutex::new(None),
            ticker_thread: Mutex::new(None),
        });

        let engine = Self(inner);
        engine.spawn_pump_thread();
        engine.spawn_ticker_thread();
        Ok(engine)
    }

    fn spawn_pump_thread(&self) {
        let inner = self.0.clone();
        let handle = thread::Builder::new()
            .name("xconn-engine-pump".to_string())
            .spawn(move || pump_loop(inner))
            .expect("failed to spawn engine pump thread");
        *self.0.pump_thread.lock().unwrap() = Some(handle);
    }

    fn spawn_ticker_thread(&self) {
        let inner = self.0.clone();
        let handle = thread::Builder::new()
            .name("xconn-engine-ticker".to_string())
            .spawn(move || ticker_loop(inner))
            .expect("failed to spawn engine ticker thread");
        *self.0.ticker_thread.lock().unwrap() = Some(handle);
    }

    /// Register a new session. The session is created in
    /// [`SessionState::Created`](crate::session::SessionState::Created); an
    /// acceptor-role session becomes reachable once its port has a listener
    /// (see [`Engine::listen`]), an initiator dials out via
    /// [`Engine::connect`].
    pub fn register(&self, config: SessionConfig) -> Result<()> {
        if self.0.sessions.contains_key(&config.session_id) {
            return Err(Error::Config(format!("session '{}' already registered", config.session_id)));
        }

        let session = Session::new(config.clone(), self.0.observer.clone() as Arc<dyn SessionObserver>, self.0.store.clone());
        let handle = Arc::new(SessionHandle {
            session_id: config.session_id.clone(),
            config: config.clone(),
            session: Mutex::new(session),
            token: Mutex::new(None),
            token_owner: self.0.token_owner.clone(),
            reconnect_attempts: AtomicU32::new(0),
        });
        self.0.sessions.insert(config.session_id.clone(), handle.clone());

        if let Some(schedule) = config.schedule.clone() {
            self.0.scheduler.lock().unwrap().bind(config.session_id.clone(), schedule);
        }

        if config.role == SessionRole::Acceptor {
            let acceptor = self.acceptor_for_port(config.port, config.protocol);
            let key = route_key_for(&config);
            acceptor.register_route(key, handle as Arc<dyn SessionSink>);
        }

        Ok(())
    }

    /// Ensure a listening acceptor exists for `port`/`protocol`, creating
    /// and binding one to the event loop if this is the first session
    /// registered on it.
    fn acceptor_for_port(&self, port: u16, protocol: crate::config::ProtocolKind) -> Arc<Acceptor> {
        if let Some(existing) = self.0.acceptors.get(&port) {
            return existing.clone();
        }
        let acceptor_protocol = match protocol {
            crate::config::ProtocolKind::Fix => AcceptorProtocol::Fix,
            _ => AcceptorProtocol::SoupBinTcp,
        };
        let acceptor = Arc::new(Acceptor::new(acceptor_protocol, port));
        self.0.acceptors.insert(port, acceptor.clone());
        if let Ok(mut net) = self.0.net.lock() {
            if let Err(e) = net.listen(format!("0.0.0.0:{port}").parse().expect("valid listen addr")) {
                logging::error!("[engine] failed to request listener on port {port}: {e}");
            }
        }
        acceptor
    }

    pub fn unregister(&self, session_id: &str) -> Result<()> {
        let (_, handle) = self
            .0
            .sessions
            .remove(session_id)
            .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
        self.0.scheduler.lock().unwrap().unbind(session_id);
        if let Some(token) = *handle.token.lock().unwrap() {
            self.0.token_owner.remove(&token);
            let _ = self.0.net.lock().unwrap().close(token);
        }
        Ok(())
    }

    /// Dial out an initiator session. No-op (returns the existing dial's
    /// error surface) if the session isn't an initiator.
    pub fn connect(&self, session_id: &str) -> Result<()> {
        let handle = self.session_handle(session_id)?;
        if handle.config.role != SessionRole::Initiator {
            return Err(Error::Config(format!("session '{session_id}' is not an initiator")));
        }
        let addr = handle.config.socket_addr()?;
        let mut net = self.0.net.lock().unwrap();
        let reply_token = net.connect(addr).map_err(Error::Io)?;
        drop(net);
        self.0.pending_connects.insert(reply_token, session_id.to_string());
        Ok(())
    }

    pub fn disconnect(&self, session_id: &str) -> Result<()> {
        let handle = self.session_handle(session_id)?;
        let _ = handle.session.lock().unwrap().disconnect();
        if let Some(token) = handle.token.lock().unwrap().take() {
            self.0.token_owner.remove(&token);
            let _ = self.0.net.lock().unwrap().close(token);
        }
        Ok(())
    }

    pub fn trigger_eod(&self, session_id: &str) -> Result<()> {
        let handle = self.session_handle(session_id)?;
        handle.session.lock().unwrap().reset_for_eod("manual")
    }

    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.0.sessions.get(session_id).map(|h| h.session.lock().unwrap().state())
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.0.observer.add_state_listener(listener);
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.0.observer.add_message_listener(listener);
    }

    fn session_handle(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.0
            .sessions
            .get(session_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(session_id.to_string()))
    }

    /// Graceful shutdown per the cancellation sequence: stop accepting new
    /// sessions, Logout every logged-on session, wait up to `grace`,
    /// disconnect whatever remains, stop the event loop, flush and close
    /// persistence.
    pub fn shutdown(&self) -> Result<()> {
        self.0.running.store(false, Ordering::Relaxed);

        for entry in self.0.sessions.iter() {
            let mut session = entry.value().session.lock().unwrap();
            if session.state().is_established() {
                let _ = session.send_logout("engine shutdown");
            }
        }

        let deadline = Instant::now() + self.0.config.shutdown_grace;
        loop {
            let all_quiesced = self
                .0
                .sessions
                .iter()
                .all(|e| matches!(e.value().session.lock().unwrap().state(), SessionState::Disconnected | SessionState::Stopped | SessionState::LogoutReceived));
            if all_quiesced || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }

        for entry in self.0.sessions.iter() {
            let mut session = entry.value().session.lock().unwrap();
            let _ = session.disconnect();
            let _ = session.stop();
        }
        for entry in self.0.token_owner.iter() {
            let _ = self.0.net.lock().unwrap().close(*entry.key());
        }
        self.0.token_owner.clear();

        if let Some(handle) = self.0.pump_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.0.ticker_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.0.net.lock().unwrap().shutdown().map_err(Error::Io)?;

        if let Some(store) = &self.0.store {
            store.sync_all()?;
        }
        Ok(())
    }
}

fn route_key_for(config: &SessionConfig) -> crate::acceptor::RouteKey {
    match config.protocol {
        crate::config::ProtocolKind::Fix => crate::acceptor::fix_route_for_session(&config.sender_id, &config.target_id, config.port),
        _ => crate::acceptor::username_route_for_session(&config.sender_id, config.port),
    }
}

fn pump_loop(inner: Arc<EngineInner>) {
    while inner.running.load(Ordering::Relaxed) {
        let event = {
            let net = inner.net.lock().unwrap();
            net.recv_timeout(Duration::from_millis(50))
        };
        match event {
            Some(LoopEvent::Accepted { token, local_port, remote_addr, ring }) => {
                if let Some(acceptor) = inner.acceptors.get(&local_port) {
                    acceptor.on_accepted(token, remote_addr, ring);
                    inner.token_owner.insert(token, TokenOwner::Pending(local_port));
                } else {
                    logging::warn!("[engine] accepted connection on unmanaged port {local_port}");
                }
            }
            Some(LoopEvent::ConnectionEstablished { reply_token, token, remote_addr: _, ring }) => {
                if let Some((_, session_id)) = inner.pending_connects.remove(&reply_token) {
                    if let Some(handle) = inner.sessions.get(&session_id) {
                        handle.reconnect_attempts.store(0, Ordering::Relaxed);
                        inner.token_owner.insert(token, TokenOwner::Bound(session_id.clone()));
                        *handle.token.lock().unwrap() = Some(token);
                        let mut session = handle.session.lock().unwrap();
                        if let Err(e) = session.bind(ring, Vec::new()) {
                            logging::error!("[engine] bind failed for initiator session {session_id}: {e}");
                        }
                    }
                }
            }
            Some(LoopEvent::DataReceived { token, bytes }) => {
                route_data(&inner, token, &bytes);
            }
            Some(LoopEvent::Closed { token, reason }) => {
                handle_closed(&inner, token, reason);
            }
            Some(LoopEvent::Error { token, error }) => {
                logging::warn!("[engine] net error (token {token:?}): {error}");
                if let Some(reply_token) = token {
                    if let Some((_, session_id)) = inner.pending_connects.remove(&reply_token) {
                        schedule_reconnect_if_configured(&inner, &session_id);
                    }
                }
            }
            Some(LoopEvent::Listening { .. } | LoopEvent::Started) => {}
            Some(LoopEvent::Stopped) => break,
            None => {}
        }
    }
}

fn route_data(inner: &Arc<EngineInner>, token: usize, bytes: &[u8]) {
    let owner = inner.token_owner.get(&token).map(|e| e.clone());
    match owner {
        Some(TokenOwner::Pending(port)) => {
            let Some(acceptor) = inner.acceptors.get(&port) else { return };
            match acceptor.on_data(token, bytes) {
                AcceptorAction::NeedMore | AcceptorAction::Bound => {}
                AcceptorAction::Rejected | AcceptorAction::Overflow => {
                    inner.token_owner.remove(&token);
                    let _ = inner.net.lock().unwrap().close(token);
                }
            }
        }
        Some(TokenOwner::Bound(session_id)) => {
            let Some(handle) = inner.sessions.get(&session_id) else { return };
            let mut session = handle.session.lock().unwrap();
            if let Err(e) = session.on_data(bytes) {
                logging::warn!("[engine] session {session_id} on_data failed: {e}, disconnecting");
                let _ = session.disconnect();
                drop(session);
                inner.token_owner.remove(&token);
                let _ = inner.net.lock().unwrap().close(token);
            }
        }
        None => {}
    }
}

fn handle_closed(inner: &Arc<EngineInner>, token: usize, reason: Option<String>) {
    let owner = inner.token_owner.remove(&token).map(|(_, o)| o);
    match owner {
        Some(TokenOwner::Pending(port)) => {
            if let Some(acceptor) = inner.acceptors.get(&port) {
                acceptor.forget(token);
            }
        }
        Some(TokenOwner::Bound(session_id)) => {
            if let Some(handle) = inner.sessions.get(&session_id) {
                let _ = handle.session.lock().unwrap().disconnect();
                *handle.token.lock().unwrap() = None;
            }
            logging::info!("[engine] session {session_id} channel closed: {}", reason.unwrap_or_default());
            schedule_reconnect_if_configured(inner, &session_id);
        }
        None => {}
    }
}

fn schedule_reconnect_if_configured(inner: &Arc<EngineInner>, session_id: &str) {
    let Some(handle) = inner.sessions.get(session_id) else { return };
    if handle.config.role != SessionRole::Initiator || handle.config.max_reconnect_attempts == 0 {
        return;
    }
    let attempts = handle.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
    if attempts > handle.config.max_reconnect_attempts {
        logging::warn!("[engine] session {session_id} exhausted reconnect attempts ({attempts})");
        return;
    }
    let Ok(addr) = handle.config.socket_addr() else { return };
    let interval = handle.config.reconnect_interval;
    let inner = inner.clone();
    let session_id = session_id.to_string();
    thread::spawn(move || {
        thread::sleep(interval);
        if !inner.running.load(Ordering::Relaxed) {
            return;
        }
        let mut net = inner.net.lock().unwrap();
        match net.connect(addr) {
            Ok(reply_token) => {
                drop(net);
                inner.pending_connects.insert(reply_token, session_id);
            }
            Err(e) => logging::warn!("[engine] reconnect dial for {session_id} failed: {e}"),
        }
    });
}

fn ticker_loop(inner: Arc<EngineInner>) {
    while inner.running.load(Ordering::Relaxed) {
        thread::sleep(inner.config.tick_interval);
        if !inner.running.load(Ordering::Relaxed) {
            break;
        }

        let now = Instant::now();
        for entry in inner.sessions.iter() {
            let mut session = entry.value().session.lock().unwrap();
            if let Err(e) = session.tick(now) {
                logging::warn!("[engine] session {} tick error: {e}", entry.key());
                let _ = session.disconnect();
            }
        }

        let edges = inner.scheduler.lock().unwrap().poll();
        for edge in edges {
            apply_schedule_edge(&inner, &edge.session_id, edge.event);
        }
    }
}

fn apply_schedule_edge(inner: &Arc<EngineInner>, session_id: &str, event: ScheduleEvent) {
    let Some(handle) = inner.sessions.get(session_id) else { return };
    match event {
        ScheduleEvent::SessionStart => {
            if handle.config.role == SessionRole::Initiator {
                let state = handle.session.lock().unwrap().state();
                if matches!(state, SessionState::Created | SessionState::Disconnected) {
                    drop(handle);
                    if let Err(e) = Engine(inner.clone()).connect(session_id) {
                        logging::warn!("[engine] schedule-driven connect for {session_id} failed: {e}");
                    }
                }
            }
        }
        ScheduleEvent::SessionEnd => {
            let mut session = handle.session.lock().unwrap();
            if session.state().is_established() {
                let _ = session.send_logout("schedule close");
            }
        }
        ScheduleEvent::ResetDue => {
            let _ = handle.session.lock().unwrap().reset_for_eod("schedule");
        }
        ScheduleEvent::PreOpenWarning | ScheduleEvent::PreCloseWarning => {
            logging::info!("[engine] schedule pre-warning for {session_id}: {event:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkConfig, ProtocolKind, TlsSettings};
    use std::sync::atomic::AtomicUsize;

    fn base_config(id: &str, role: SessionRole, port: u16) -> SessionConfig {
        SessionConfig {
            session_id: id.to_string(),
            protocol: ProtocolKind::Fix,
            role,
            sender_id: "US".into(),
            target_id: "THEM".into(),
            host: "127.0.0.1".into(),
            port,
            heartbeat_interval: Duration::from_secs(30),
            reset_on_logon: false,
            reset_on_logout: false,
            reset_on_disconnect: false,
            reset_on_eod: true,
            reconnect_interval: Duration::from_millis(50),
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

    fn test_engine() -> Engine {
        Engine::new(EngineConfig {
            tick_interval: Duration::from_millis(30),
            persistence: PersistenceConfig { enabled: false, ..PersistenceConfig::default() },
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn register_then_duplicate_is_rejected() {
        let engine = test_engine();
        engine.register(base_config("A", SessionRole::Initiator, 0)).unwrap();
        let err = engine.register(base_config("A", SessionRole::Initiator, 0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        engine.shutdown().unwrap();
    }

    #[test]
    fn unknown_session_operations_return_not_found() {
        let engine = test_engine();
        assert!(matches!(engine.connect("ghost"), Err(Error::NotFound(_))));
        assert!(matches!(engine.disconnect("ghost"), Err(Error::NotFound(_))));
        assert!(matches!(engine.trigger_eod("ghost"), Err(Error::NotFound(_))));
        assert!(engine.session_state("ghost").is_none());
        engine.shutdown().unwrap();
    }

    #[test]
    fn connect_rejects_acceptor_role_sessions() {
        let engine = test_engine();
        engine.register(base_config("B", SessionRole::Acceptor, 0)).unwrap();
        let err = engine.connect("B").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        engine.shutdown().unwrap();
    }

    #[test]
    fn registered_session_starts_created() {
        let engine = test_engine();
        engine.register(base_config("C", SessionRole::Initiator, 0)).unwrap();
        assert_eq!(engine.session_state("C"), Some(SessionState::Created));
        engine.shutdown().unwrap();
    }

    #[test]
    fn state_listener_fan_out_is_isolated_from_panics() {
        let engine = test_engine();

        struct PanicsListener;
        impl StateListener for PanicsListener {
            fn on_state_changed(&self, _id: &str, _from: SessionState, _to: SessionState) {
                panic!("boom");
            }
        }

        struct CountingListener(Arc<AtomicUsize>);
        impl StateListener for CountingListener {
            fn on_state_changed(&self, _id: &str, _from: SessionState, _to: SessionState) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        engine.add_state_listener(Arc::new(PanicsListener));
        engine.add_state_listener(Arc::new(CountingListener(count.clone())));

        engine.0.observer.on_state_changed("X", SessionState::Created, SessionState::Connecting);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        engine.shutdown().unwrap();
    }

    #[test]
    fn shutdown_with_no_sessions_completes_cleanly() {
        let engine = test_engine();
        engine.shutdown().unwrap();
    }

    #[test]
    fn unregister_unknown_session_errors() {
        let engine = test_engine();
        assert!(matches!(engine.unregister("ghost"), Err(Error::NotFound(_))));
        engine.shutdown().unwrap();
    }
}
