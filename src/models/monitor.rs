use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::region::{Region, RegionId, RegionStatusKind};
use crate::engine::{pause_status, ReminderTracker};
use crate::settings::MonitorSettings;

/// State shared by all regions: the global pause, settings and reminder cadence.
#[derive(Debug, Clone)]
pub struct GlobalMonitorState {
    pub paused: bool,
    pub settings: MonitorSettings,
    pub reminder: ReminderTracker,
}

impl GlobalMonitorState {
    pub fn new(settings: MonitorSettings) -> Self {
        let reminder = ReminderTracker::new(settings.pause_reminder_interval_seconds);
        Self {
            paused: false,
            settings,
            reminder,
        }
    }

    /// Flips the global pause. Pausing restarts the reminder countdown.
    pub fn toggle_pause(&mut self, now: DateTime<Utc>) -> bool {
        self.paused = !self.paused;
        if self.paused {
            self.reminder.reset(now);
        }
        self.paused
    }

    pub fn apply_settings(&mut self, settings: MonitorSettings) {
        self.reminder
            .set_interval(settings.pause_reminder_interval_seconds);
        self.settings = settings;
    }

    pub fn anything_paused(&self, regions: &[Region]) -> bool {
        self.paused || regions.iter().any(|r| r.paused)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    pub index: usize,
    pub id: RegionId,
    pub name: String,
    pub status: RegionStatusKind,
    pub label: String,
    pub color: String,
    pub sound_muted_secs: Option<i64>,
    pub tts_muted_secs: Option<i64>,
    pub last_score: Option<f64>,
    pub diagnostic: Option<String>,
    pub last_alert_time: Option<DateTime<Utc>>,
}

/// What a front end needs to draw the monitor after a tick or command.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tick: u64,
    pub paused: bool,
    pub status_line: Option<String>,
    pub regions: Vec<RegionStatus>,
}

impl MonitorSnapshot {
    /// Reading mute countdowns is an observation, so expired mutes clear here.
    pub fn observe(
        global: &GlobalMonitorState,
        regions: &mut [Region],
        now: DateTime<Utc>,
        tick: u64,
    ) -> Self {
        let paused_regions = regions.iter().filter(|r| r.paused).count();
        let status_line = pause_status(
            global.paused,
            paused_regions,
            global.reminder.next_in_secs(now),
        );

        let regions = regions
            .iter_mut()
            .enumerate()
            .map(|(index, region)| {
                let status = region.status();
                let (label, color) = global.settings.style.for_status(status);
                RegionStatus {
                    index,
                    id: region.id,
                    name: region.display_name(index),
                    status,
                    label: label.to_string(),
                    color: color.to_string(),
                    sound_muted_secs: region.mute_sound.remaining_secs(now),
                    tts_muted_secs: region.mute_tts.remaining_secs(now),
                    last_score: region.last_result.as_ref().map(|r| r.combined),
                    diagnostic: region.last_result.as_ref().map(|r| r.diagnostic.clone()),
                    last_alert_time: region.alert.last_alert_time,
                }
            })
            .collect();

        Self {
            taken_at: now,
            tick,
            paused: global.paused,
            status_line,
            regions,
        }
    }

    pub fn empty() -> Self {
        Self {
            taken_at: Utc::now(),
            tick: 0,
            paused: false,
            status_line: None,
            regions: Vec::new(),
        }
    }
}

impl fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>2}. {} [{}]", self.index + 1, self.name, self.label)?;
        if let Some(score) = self.last_score {
            write!(f, " score={score:.3}")?;
        }
        if let Some(secs) = self.sound_muted_secs {
            write!(f, " sound muted {secs}s")?;
        }
        if let Some(secs) = self.tts_muted_secs {
            write!(f, " tts muted {secs}s")?;
        }
        if let Some(diagnostic) = self.diagnostic.as_deref().filter(|d| !d.is_empty()) {
            write!(f, " ({diagnostic})")?;
        }
        Ok(())
    }
}

impl fmt::Display for MonitorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status_line {
            Some(line) => writeln!(f, "{line}")?,
            None => writeln!(f, "Monitoring")?,
        }
        for region in &self.regions {
            writeln!(f, "{region}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rect;
    use chrono::{TimeDelta, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn pausing_resets_reminder_countdown() {
        let mut global = GlobalMonitorState::new(MonitorSettings::default());
        assert!(global.toggle_pause(at(10)));
        assert_eq!(global.reminder.last_reminder(), Some(at(10)));
        assert!(!global.toggle_pause(at(20)));
        assert_eq!(global.reminder.last_reminder(), Some(at(10)));
    }

    #[test]
    fn snapshot_reports_labels_and_expires_mutes() {
        let global = GlobalMonitorState::new(MonitorSettings::default());
        let mut regions = vec![
            Region::new("", Rect::new(0, 0, 4, 4).unwrap()),
            Region::new("chat", Rect::new(0, 0, 4, 4).unwrap()),
        ];
        regions[0].paused = true;
        regions[1].mute_sound.mute_for(at(0), TimeDelta::seconds(10));

        let snap = MonitorSnapshot::observe(&global, &mut regions, at(4), 3);
        assert_eq!(snap.tick, 3);
        assert_eq!(snap.regions[0].name, "Region 1");
        assert_eq!(snap.regions[0].label, "Paused");
        assert_eq!(snap.regions[0].color, "#08f");
        assert_eq!(snap.regions[1].label, "Green");
        assert_eq!(snap.regions[1].sound_muted_secs, Some(6));
        assert_eq!(
            snap.status_line.as_deref(),
            Some("PAUSED (1 region) - Next reminder in 0s")
        );

        let later = MonitorSnapshot::observe(&global, &mut regions, at(11), 4);
        assert_eq!(later.regions[1].sound_muted_secs, None);
        assert_eq!(regions[1].mute_sound.deadline(), None);
    }
}
