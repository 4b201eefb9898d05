//! Per-region mutes and the "something is paused" reminder.
//!
//! Nothing here runs on its own: expiry is discovered whenever a timer is
//! looked at with the current time.

use chrono::{DateTime, TimeDelta, Utc};

/// `secs` as a `TimeDelta`, saturating at `TimeDelta::MAX`.
pub fn saturating_seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// `minutes` as a `TimeDelta`, saturating at `TimeDelta::MAX`.
pub fn saturating_minutes(minutes: u64) -> TimeDelta {
    i64::try_from(minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .unwrap_or(TimeDelta::MAX)
}

/// A channel mute (sound or speech) that lapses by itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuteTimer {
    until: Option<DateTime<Utc>>,
}

impl MuteTimer {
    pub fn until(until: Option<DateTime<Utc>>) -> Self {
        Self { until }
    }

    /// Deadlines past the representable range pin to the last instant chrono knows.
    pub fn mute_for(&mut self, now: DateTime<Utc>, duration: TimeDelta) {
        self.until = Some(
            now.checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }

    pub fn clear(&mut self) {
        self.until = None;
    }

    /// Mutes for `duration` if currently unmuted, otherwise unmutes.
    /// Returns whether the channel is muted afterwards.
    pub fn toggle(&mut self, now: DateTime<Utc>, duration: TimeDelta) -> bool {
        if self.is_active(now) {
            self.clear();
            false
        } else {
            self.mute_for(now, duration);
            true
        }
    }

    /// True while `now < until`. An expired mute is cleared here.
    pub fn is_active(&mut self, now: DateTime<Utc>) -> bool {
        match self.until {
            Some(until) if now < until => true,
            Some(_) => {
                self.until = None;
                false
            }
            None => false,
        }
    }

    /// Whole seconds left, or `None` when not muted.
    pub fn remaining_secs(&mut self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_active(now) {
            return None;
        }
        self.until.map(|until| (until - now).num_seconds().max(0))
    }

    /// Raw deadline without expiring it; used for persistence.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.until
    }
}

/// Plays a reminder tone every `interval` while anything is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderTracker {
    interval: TimeDelta,
    last_reminder: Option<DateTime<Utc>>,
}

impl ReminderTracker {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: saturating_seconds(interval_secs),
            last_reminder: None,
        }
    }

    pub fn set_interval(&mut self, interval_secs: u64) {
        self.interval = saturating_seconds(interval_secs);
    }

    pub fn enabled(&self) -> bool {
        self.interval > TimeDelta::zero()
    }

    /// Restart the countdown, e.g. when something was just paused.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.last_reminder = Some(now);
    }

    pub fn last_reminder(&self) -> Option<DateTime<Utc>> {
        self.last_reminder
    }

    /// True (and the countdown restarts) when a reminder should play now.
    pub fn poll(&mut self, anything_paused: bool, now: DateTime<Utc>) -> bool {
        if !anything_paused || !self.enabled() {
            return false;
        }
        let due = self
            .last_reminder
            .map_or(true, |last| now.signed_duration_since(last) >= self.interval);
        if due {
            self.last_reminder = Some(now);
        }
        due
    }

    /// Seconds until the next reminder, or `None` if reminders are off.
    pub fn next_in_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.enabled() {
            return None;
        }
        let remaining = match self.last_reminder {
            Some(last) => self
                .interval
                .checked_sub(&now.signed_duration_since(last))
                .unwrap_or(TimeDelta::MAX),
            None => TimeDelta::zero(),
        };
        Some(remaining.num_seconds().max(0))
    }
}

/// Status bar text while anything is paused, `None` otherwise.
pub fn pause_status(
    global_paused: bool,
    paused_regions: usize,
    next_reminder_secs: Option<i64>,
) -> Option<String> {
    let what = match (global_paused, paused_regions) {
        (false, 0) => return None,
        (true, 0) => "PAUSED (Global)".to_string(),
        (true, n) => format!("PAUSED (Global + {n} regions)"),
        (false, 1) => "PAUSED (1 region)".to_string(),
        (false, n) => format!("PAUSED ({n} regions)"),
    };

    Some(match next_reminder_secs {
        Some(secs) => format!("{what} - Next reminder in {secs}s"),
        None => what,
    })
}
