//! Poll scheduling
//!
//! The poll interval adapts to the check state, and outside working hours
//! the monitor sleeps until the next workday unless an extension is active.
//! All calculations run on local wall-clock time passed in by the caller.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Timelike, Weekday};
use std::time::Duration;

use crate::config::MonitorConfig;
use crate::state::MonitorState;

/// What the poll worker should do between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWait {
    pub duration: Duration,
    /// True when this sleep is the after-hours pause (logged once as PAUSED)
    pub after_hours: bool,
}

/// Weekends and anything outside the working window count as after-hours
pub fn is_after_hours(config: &MonitorConfig, now: NaiveDateTime) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return true;
    }
    let hour = now.hour();
    hour < config.work_start_hour || hour >= config.work_end_hour
}

/// The next weekday at the start of working hours
pub fn next_work_start(config: &MonitorConfig, now: NaiveDateTime) -> NaiveDateTime {
    let mut date = now.date();
    let today_start = date
        .and_hms_opt(config.work_start_hour, 0, 0)
        .unwrap_or(now);
    if now >= today_start || matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        date = date.succ_opt().unwrap_or(date);
    }
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date = date.succ_opt().unwrap_or(date);
    }
    date.and_hms_opt(config.work_start_hour, 0, 0).unwrap_or(now)
}

/// Pick the wait before the next poll iteration
pub fn next_poll_wait(state: &MonitorState, config: &MonitorConfig, now: NaiveDateTime) -> PollWait {
    if is_after_hours(config, now) {
        let extended = state
            .after_hours_until
            .map(|until| now < until)
            .unwrap_or(false);
        if !extended {
            let wake = next_work_start(config, now);
            let until_wake = (wake - now)
                .to_std()
                .unwrap_or_else(|_| Duration::from_secs(config.after_hours_min_secs));
            let floor = Duration::from_secs(config.after_hours_min_secs);
            return PollWait {
                duration: until_wake.max(floor),
                after_hours: true,
            };
        }
    }

    let secs = if state.checks.total == 0 {
        config.poll_no_checks_secs
    } else if !state.checks.is_complete() {
        config.poll_pending_secs
    } else {
        config.poll_complete_secs
    };
    PollWait {
        duration: Duration::from_secs(secs),
        after_hours: false,
    }
}

/// Apply an EXTEND trigger: add to a live extension, or open a fresh window
pub fn extend_after_hours(state: &mut MonitorState, config: &MonitorConfig, now: NaiveDateTime) {
    let base = match state.after_hours_until {
        Some(until) if until > now => until,
        _ => now,
    };
    state.after_hours_until = Some(base + ChronoDuration::hours(config.extension_hours));
}
