// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Market-hours scheduler: turns a [`Schedule`] into edge-triggered events.
//!
//! A [`Schedule`] describes open/close times (and an optional daily reset
//! time) per window, each in its own named time zone with a day-of-week
//! mask. The scheduler itself never sleeps or spawns a thread; a caller
//! (the engine's ticker thread, per-spec a one-second cadence) calls
//! [`Scheduler::poll`] on its own schedule and gets back the edges that
//! crossed since the last call. This keeps the scheduler deterministic and
//! testable: swap in a [`MockClock`] and call `poll` as many times as a
//! test needs, with no real time passing.
//!
//! | Event | Fires when |
//! |-------|------------|
//! | [`ScheduleEvent::PreOpenWarning`] | `pre_warning` before a window opens (once/day) |
//! | [`ScheduleEvent::SessionStart`] | a bound session transitions closed -> open |
//! | [`ScheduleEvent::PreCloseWarning`] | `pre_warning` before a window closes (once/day) |
//! | [`ScheduleEvent::SessionEnd`] | a bound session transitions open -> closed |
//! | [`ScheduleEvent::ResetDue`] | local time crosses a window's `eod_time` (once/day) |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::config::{Schedule, ScheduleWindow};

/// Abstracts "what time is it" so the scheduler can be driven by a fake
/// clock in tests instead of [`Utc::now`].
pub trait ClockProvider: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall-clock [`ClockProvider`] used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockProvider for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic scheduler tests.
#[derive(Debug)]
pub struct MockClock {
    now: Mutex<DateTime<Utc>>,
}

impl MockClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += chrono::Duration::from_std(by).expect("advance duration overflow");
    }
}

impl ClockProvider for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// An edge-triggered schedule event for one bound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    SessionStart,
    SessionEnd,
    ResetDue,
    PreOpenWarning,
    PreCloseWarning,
}

/// A single emitted edge: which session, which event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEdge {
    pub session_id: String,
    pub event: ScheduleEvent,
}

/// Whether `now` falls within `window`'s open interval, evaluated in the
/// window's own time zone. Windows where `start_time > end_time` are
/// treated as spanning midnight (e.g. an FX session open 22:00-06:00).
fn window_is_open(window: &ScheduleWindow, now_utc: DateTime<Utc>) -> bool {
    let local = now_utc.with_timezone(&window.time_zone);
    let t = local.time();
    let today_active = window.is_day_active(local.weekday());

    if window.start_time <= window.end_time {
        today_active && t >= window.start_time && t < window.end_time
    } else {
        // Overnight window: open if we're past start_time today (day mask
        // gates the start day) or before end_time, which falls on the
        // following calendar day relative to the mask.
        let yesterday_active = window.is_day_active(local.date_naive().pred_opt().map_or(local.weekday(), |d| d.weekday()));
        (today_active && t >= window.start_time) || (yesterday_active && t < window.end_time)
    }
}

/// Whether `now` has just crossed `window`'s `eod_time` and the window's
/// day mask is active for today, in the window's own time zone.
fn window_reset_state(window: &ScheduleWindow, now_utc: DateTime<Utc>) -> Option<(NaiveDate, bool)> {
    let eod = window.eod_time?;
    let local = now_utc.with_timezone(&window.time_zone);
    let due = window.is_day_active(local.weekday()) && local.time() >= eod;
    Some((local.date_naive(), due))
}

/// Per-window local time-of-day, used for pre-warning lookahead.
fn minus(t: NaiveTime, d: Duration) -> NaiveTime {
    let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
    t - chrono::Duration::seconds(secs)
}

struct TrackedSession {
    schedule: Schedule,
    is_open: bool,
    pre_open_warned: Option<NaiveDate>,
    pre_close_warned: Option<NaiveDate>,
    reset_warned: Option<NaiveDate>,
}

impl TrackedSession {
    fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            is_open: false,
            pre_open_warned: None,
            pre_close_warned: None,
            reset_warned: None,
        }
    }
}

/// Drives schedule-edge detection for every bound session.
///
/// Not `Send`-constrained beyond its clock: callers own the poll cadence
/// (the engine's ticker thread, per spec, on a one-second loop) and post
/// the returned edges onto the event loop's task queue rather than acting
/// on sessions directly from this call.
pub struct Scheduler {
    clock: Arc<dyn ClockProvider>,
    sessions: HashMap<String, TrackedSession>,
    pre_warning: Option<Duration>,
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockProvider>) -> Self {
        Self { clock, sessions: HashMap::new(), pre_warning: None }
    }

    /// Emit `PreOpenWarning` / `PreCloseWarning` edges this far ahead of
    /// the corresponding open/close edge. Disabled (`None`) by default.
    #[must_use]
    pub fn with_pre_warning(mut self, lead: Duration) -> Self {
        self.pre_warning = Some(lead);
        self
    }

    pub fn bind(&mut self, session_id: impl Into<String>, schedule: Schedule) {
        self.sessions.insert(session_id.into(), TrackedSession::new(schedule));
    }

    pub fn unbind(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn is_bound(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Evaluate every bound session's schedule against the current clock
    /// reading and return the edges that fired since the last call.
    ///
    /// Pure edge triggering: a session whose window has been open for an
    /// hour produces nothing on this call, only the single `SessionStart`
    /// at the moment it opened.
    pub fn poll(&mut self) -> Vec<ScheduleEdge> {
        let now = self.clock.now_utc();
        let mut edges = Vec::new();

        for (session_id, tracked) in &mut self.sessions {
            let open_now = tracked.schedule.windows.iter().any(|w| window_is_open(w, now));

            if let Some(lead) = self.pre_warning {
                for window in &tracked.schedule.windows {
                    let local = now.with_timezone(&window.time_zone);
                    if !window.is_day_active(local.weekday()) {
                        continue;
                    }
                    let today = local.date_naive();
                    if !open_now
                        && !tracked.is_open
                        && local.time() >= minus(window.start_time, lead)
                        && local.time() < window.start_time
                        && tracked.pre_open_warned != Some(today)
                    {
                        tracked.pre_open_warned = Some(today);
                        edges.push(ScheduleEdge { session_id: session_id.clone(), event: ScheduleEvent::PreOpenWarning });
                    }
                    if open_now
                        && local.time() >= minus(window.end_time, lead)
                        && local.time() < window.end_time
                        && tracked.pre_close_warned != Some(today)
                    {
                        tracked.pre_close_warned = Some(today);
                        edges.push(ScheduleEdge { session_id: session_id.clone(), event: ScheduleEvent::PreCloseWarning });
                    }
                }
            }

            if open_now && !tracked.is_open {
                edges.push(ScheduleEdge { session_id: session_id.clone(), event: ScheduleEvent::SessionStart });
            } else if !open_now && tracked.is_open {
                edges.push(ScheduleEdge { session_id: session_id.clone(), event: ScheduleEvent::SessionEnd });
            }
            tracked.is_open = open_now;

            for window in &tracked.schedule.windows {
                if let Some((today, true)) = window_reset_state(window, now) {
                    if tracked.reset_warned != Some(today) {
                        tracked.reset_warned = Some(today);
                        edges.push(ScheduleEdge { session_id: session_id.clone(), event: ScheduleEvent::ResetDue });
                    }
                }
            }
        }

        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_9_to_16_ny(eod: Option<NaiveTime>) -> Schedule {
        Schedule {
            name: "equities".into(),
            windows: vec![ScheduleWindow {
                start_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                eod_time: eod,
                time_zone: chrono_tz::America::New_York,
                day_mask: 0b0001_1111,
            }],
        }
    }

    fn utc_ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        // Interprets (y, m, d, h, min) as New York wall-clock time and converts to UTC.
        chrono_tz::America::New_York
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn session_start_fires_once_on_open_edge() {
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 5, 9, 0))); // Monday
        let mut sched = Scheduler::new(clock.clone());
        sched.bind("ARCA", schedule_9_to_16_ny(None));

        assert!(sched.poll().is_empty());

        clock.set(utc_ny(2026, 1, 5, 9, 30));
        let edges = sched.poll();
        assert_eq!(edges, vec![ScheduleEdge { session_id: "ARCA".into(), event: ScheduleEvent::SessionStart }]);

        // Still open an hour later: no repeat edge.
        clock.set(utc_ny(2026, 1, 5, 10, 30));
        assert!(sched.poll().is_empty());
    }

    #[test]
    fn session_end_fires_on_close_edge() {
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 5, 9, 30)));
        let mut sched = Scheduler::new(clock.clone());
        sched.bind("ARCA", schedule_9_to_16_ny(None));
        sched.poll();

        clock.set(utc_ny(2026, 1, 5, 16, 0));
        let edges = sched.poll();
        assert_eq!(edges, vec![ScheduleEdge { session_id: "ARCA".into(), event: ScheduleEvent::SessionEnd }]);
    }

    #[test]
    fn closed_on_weekend_day_mask() {
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 10, 9, 30))); // Saturday
        let mut sched = Scheduler::new(clock.clone());
        sched.bind("ARCA", schedule_9_to_16_ny(None));
        assert!(sched.poll().is_empty());
    }

    #[test]
    fn reset_due_fires_once_per_day() {
        let eod = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 5, 16, 59)));
        let mut sched = Scheduler::new(clock.clone());
        sched.bind("ARCA", schedule_9_to_16_ny(Some(eod)));
        sched.poll();

        clock.set(utc_ny(2026, 1, 5, 17, 0));
        let edges = sched.poll();
        assert!(edges.iter().any(|e| e.event == ScheduleEvent::ResetDue));

        // Still past eod_time a minute later: no repeat.
        clock.set(utc_ny(2026, 1, 5, 17, 1));
        let edges = sched.poll();
        assert!(!edges.iter().any(|e| e.event == ScheduleEvent::ResetDue));

        // Next day, past eod_time again: fires once more.
        clock.set(utc_ny(2026, 1, 6, 17, 0));
        let edges = sched.poll();
        assert!(edges.iter().any(|e| e.event == ScheduleEvent::ResetDue));
    }

    #[test]
    fn pre_open_warning_fires_once_before_start() {
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 5, 9, 25)));
        let mut sched = Scheduler::new(clock.clone()).with_pre_warning(Duration::from_secs(600));
        sched.bind("ARCA", schedule_9_to_16_ny(None));

        let edges = sched.poll();
        assert_eq!(edges, vec![ScheduleEdge { session_id: "ARCA".into(), event: ScheduleEvent::PreOpenWarning }]);

        // A later poll still before open: no repeat.
        clock.set(utc_ny(2026, 1, 5, 9, 28));
        assert!(sched.poll().is_empty());
    }

    #[test]
    fn unbind_removes_session_from_future_polls() {
        let clock = Arc::new(MockClock::new(utc_ny(2026, 1, 5, 9, 30)));
        let mut sched = Scheduler::new(clock.clone());
        sched.bind("ARCA", schedule_9_to_16_ny(None));
        assert!(sched.is_bound("ARCA"));
        sched.unbind("ARCA");
        assert!(!sched.is_bound("ARCA"));
        assert!(sched.poll().is_empty());
    }
}
