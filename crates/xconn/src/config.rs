// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration: network, persistence, and session settings.
//!
//! # Architecture
//!
//! - **Static-ish**: [`NetworkConfig`] / [`PersistenceConfig`] / [`SessionConfig`] are plain
//!   structs with `Default` impls matching the documented defaults; they're built once from
//!   a config file or builder calls and handed to the engine at startup.
//! - **Dynamic**: [`RuntimeConfig`] is the mutable, thread-safe store an already-running
//!   engine consults: the currently active [`Schedule`] (swapped atomically, e.g. when an
//!   operator reloads the week's trading calendar) plus an open-ended `user.*`/`app.*`
//!   key-value space for call sites that need to stash ad hoc settings.
//!
//! # Performance
//!
//! - **Lock-free**: `DashMap` for the user key-value store (no `RwLock` contention).
//! - **Atomic swap**: `ArcSwap` for the active schedule (readers never block a reload).

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Which side of a connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Dials out to `host:port` and sends the first Logon.
    Initiator,
    /// Waits for a connection (directly, or demuxed behind an [`crate::acceptor`]) and
    /// expects the peer to send the first Logon.
    Acceptor,
}

/// Wire protocol a session speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Fix,
    Ouch,
    Pillar,
    Sbe,
}

/// A single open/close (and optional reset) time window, in a named time zone.
///
/// `day_mask` is a bitmask over `Mon=0 .. Sun=6`; a window that runs every weekday
/// sets bits 0..=4.
#[derive(Debug, Clone)]
pub struct ScheduleWindow {
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
    pub eod_time: Option<chrono::NaiveTime>,
    pub time_zone: chrono_tz::Tz,
    pub day_mask: u8,
}

impl ScheduleWindow {
    #[must_use]
    pub fn is_day_active(&self, weekday: chrono::Weekday) -> bool {
        self.day_mask & (1 << weekday.num_days_from_monday()) != 0
    }
}

/// A named schedule: the window(s) that drive a session's lifecycle.
///
/// Swapped wholesale into [`RuntimeConfig`] so a reload never observes a half-updated
/// schedule.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub name: String,
    pub windows: Vec<ScheduleWindow>,
}

/// Network-level settings for a session's event-loop participation.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Pin the owning event-loop thread to a CPU core; `None` leaves it unpinned.
    pub cpu_affinity: Option<usize>,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub select_timeout_ms: u64,
    /// Spin on `poll` instead of blocking; trades CPU for lower wakeup latency.
    pub busy_spin_mode: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cpu_affinity: None,
            read_buffer_size: 64 * 1024,
            write_buffer_size: 256 * 1024,
            select_timeout_ms: 50,
            busy_spin_mode: false,
        }
    }
}

/// Persistence settings for a session's message log.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_log_file_size: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data"),
            max_log_file_size: 64 * 1024 * 1024,
        }
    }
}

/// Declarative TLS settings for a session, as loaded from a config file.
///
/// This is the file-shaped description; [`crate::transport::tcp::tls::TlsConfig`]
/// is the built rustls configuration the session layer constructs from it at
/// connect/listen time (only meaningful with the `tcp-tls` feature).
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

/// Full configuration for one connectivity session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub protocol: ProtocolKind,
    pub role: SessionRole,

    /// FIX `SenderCompID` / OUCH username, depending on protocol.
    pub sender_id: String,
    /// FIX `TargetCompID`; unused by the username-based binary protocols.
    pub target_id: String,

    pub host: String,
    pub port: u16,

    pub heartbeat_interval: Duration,
    pub reset_on_logon: bool,
    pub reset_on_logout: bool,
    pub reset_on_disconnect: bool,
    pub reset_on_eod: bool,

    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,

    pub schedule: Option<Schedule>,

    pub max_message_length: usize,
    pub max_tag_number: u32,

    pub fix_version: Option<String>,
    pub default_appl_ver_id: Option<String>,

    pub tls: TlsSettings,
    pub network: NetworkConfig,
    pub persistence: PersistenceConfig,
}

impl SessionConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse [`Self::addr`] into a [`SocketAddr`], resolving DNS if needed.
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        use std::net::ToSocketAddrs;
        self.addr()
            .to_socket_addrs()
            .map_err(crate::Error::Io)?
            .next()
            .ok_or_else(|| crate::Error::Config(format!("no address resolved for {}", self.addr())))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            protocol: ProtocolKind::Fix,
            role: SessionRole::Initiator,
            sender_id: String::new(),
            target_id: String::new(),
            host: String::new(),
            port: 0,
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
            fix_version: None,
            default_appl_ver_id: None,
            tls: TlsSettings::default(),
            network: NetworkConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Shared mutable runtime state (thread-safe, lock-free).
///
/// One instance is handed to every session and to the scheduler; it's the seam through
/// which an operator reloads the active schedule or stashes ad hoc `user.*`/`app.*`
/// settings without restarting the engine.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Active schedule (`None` = sessions run unconditionally).
    ///
    /// `ArcSwap` lets a reload install a new schedule without a lock; in-flight reads
    /// observe either the old or the new schedule, never a torn one.
    schedule: Arc<ArcSwap<Option<Schedule>>>,

    /// User-land key-value store (lock-free, sharded).
    user_config: Arc<DashMap<Arc<str>, Arc<str>>>,
}

impl RuntimeConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            schedule: Arc::new(ArcSwap::new(Arc::new(None))),
            user_config: Arc::new(DashMap::new()),
        }
    }

    /// Install a new active schedule (atomic swap, no lock).
    #[inline]
    pub fn set_schedule(&self, schedule: Schedule) {
        self.schedule.store(Arc::new(Some(schedule)));
    }

    /// Current active schedule, if any.
    #[inline]
    #[must_use]
    pub fn get_schedule(&self) -> Option<Schedule> {
        (**self.schedule.load()).clone()
    }

    #[inline]
    pub fn clear_schedule(&self) {
        self.schedule.store(Arc::new(None));
    }

    /// Set a user-land setting. Keys must start with `user.` or `app.`; anything else is
    /// logged and dropped rather than silently accepted under the wrong namespace.
    #[inline]
    pub fn set_user(&self, key: &str, value: &str) {
        if !key.starts_with("user.") && !key.starts_with("app.") {
            log::error!(
                "[config] user-land keys must start with 'user.' or 'app.', got: '{key}'. Skipping."
            );
            return;
        }
        self.user_config.insert(Arc::from(key), Arc::from(value));
    }

    #[inline]
    #[must_use]
    pub fn get_user(&self, key: &str) -> Option<Arc<str>> {
        self.user_config.get(key).map(|v| Arc::clone(&v))
    }

    #[inline]
    #[must_use]
    pub fn get_user_string(&self, key: &str) -> Option<String> {
        self.get_user(key).map(|v| v.to_string())
    }

    #[inline]
    pub fn remove_user(&self, key: &str) -> Option<Arc<str>> {
        self.user_config.remove(key).map(|(_, v)| v)
    }

    #[inline]
    #[must_use]
    pub fn contains_user(&self, key: &str) -> bool {
        self.user_config.contains_key(key)
    }

    #[must_use]
    pub fn search_user_prefix(&self, prefix: &str) -> Vec<(Arc<str>, Arc<str>)> {
        self.user_config
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (Arc::clone(entry.key()), Arc::clone(entry.value())))
            .collect()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_defaults_match_fix_conventions() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert!(!cfg.reset_on_logon);
        assert!(cfg.reset_on_eod);
        assert_eq!(cfg.max_tag_number, 10_000);
    }

    #[test]
    fn session_config_addr_formats_host_port() {
        let mut cfg = SessionConfig::default();
        cfg.host = "127.0.0.1".into();
        cfg.port = 9001;
        assert_eq!(cfg.addr(), "127.0.0.1:9001");
    }

    #[test]
    fn schedule_window_day_mask() {
        use chrono::Weekday;
        let w = ScheduleWindow {
            start_time: chrono::NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            end_time: chrono::NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            eod_time: None,
            time_zone: chrono_tz::America::New_York,
            day_mask: 0b0001_1111,
        };
        assert!(w.is_day_active(Weekday::Mon));
        assert!(w.is_day_active(Weekday::Fri));
        assert!(!w.is_day_active(Weekday::Sat));
        assert!(!w.is_day_active(Weekday::Sun));
    }

    #[test]
    fn runtime_config_schedule_swap() {
        let config = RuntimeConfig::new();
        assert!(config.get_schedule().is_none());

        config.set_schedule(Schedule {
            name: "default".into(),
            windows: vec![],
        });
        assert_eq!(config.get_schedule().unwrap().name, "default");

        config.clear_schedule();
        assert!(config.get_schedule().is_none());
    }

    #[test]
    fn runtime_config_user_land() {
        let config = RuntimeConfig::new();
        config.set_user("user.cache_size", "1000");
        assert_eq!(config.get_user_string("user.cache_size"), Some("1000".to_string()));

        config.set_user("app.debug_mode", "true");
        assert!(config.contains_user("app.debug_mode"));

        config.remove_user("user.cache_size");
        assert!(!config.contains_user("user.cache_size"));
    }

    #[test]
    fn runtime_config_user_invalid_key_ignored() {
        let config = RuntimeConfig::new();
        config.set_user("qos.durability.kind", "value");
        assert!(config.get_user("qos.durability.kind").is_none());
    }

    #[test]
    fn runtime_config_search_prefix() {
        let config = RuntimeConfig::new();
        config.set_user("user.a", "1");
        config.set_user("user.b", "2");
        config.set_user("app.c", "3");
        assert_eq!(config.search_user_prefix("user.").len(), 2);
    }
}
