use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::models::{Rect, Region};
use crate::settings::MonitorSettings;

use super::loop_worker::Monitor;

/// User actions, applied between ticks. Region indices are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCommand {
    TogglePause,
    ToggleRegionPause(usize),
    ToggleMuteSound(usize),
    ToggleMuteTts(usize),
    AddRegion { name: String, rect: Rect },
    RemoveRegion(usize),
    /// Renames a region or changes its alert overrides. `None` leaves a
    /// field alone; a blank override reverts to the global default.
    EditRegion {
        index: usize,
        name: Option<String>,
        sound_file: Option<String>,
        tts_message: Option<String>,
    },
    UpdateSettings(MonitorSettings),
    /// Publishes a fresh snapshot without changing anything.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    GlobalPause(bool),
    RegionPause { name: String, paused: bool },
    SoundMute { name: String, muted: bool },
    TtsMute { name: String, muted: bool },
    RegionAdded { name: String, index: usize },
    RegionRemoved { name: String },
    RegionEdited { name: String },
    SettingsUpdated,
    Refreshed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no region #{} (have {count})", .index + 1)]
    NoSuchRegion { index: usize, count: usize },
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |b: bool| if b { "on" } else { "off" };
        match self {
            CommandOutcome::GlobalPause(true) => write!(f, "monitoring paused"),
            CommandOutcome::GlobalPause(false) => write!(f, "monitoring resumed"),
            CommandOutcome::RegionPause { name, paused } => {
                write!(f, "{name}: {}", if *paused { "paused" } else { "resumed" })
            }
            CommandOutcome::SoundMute { name, muted } => {
                write!(f, "{name}: sound mute {}", on_off(*muted))
            }
            CommandOutcome::TtsMute { name, muted } => {
                write!(f, "{name}: speech mute {}", on_off(*muted))
            }
            CommandOutcome::RegionAdded { name, index } => {
                write!(f, "added region #{} {name}", index + 1)
            }
            CommandOutcome::RegionRemoved { name } => write!(f, "removed {name}"),
            CommandOutcome::RegionEdited { name } => write!(f, "updated {name}"),
            CommandOutcome::SettingsUpdated => write!(f, "settings updated"),
            CommandOutcome::Refreshed => write!(f, "refreshed"),
        }
    }
}

impl Monitor {
    fn region_mut(&mut self, index: usize) -> Result<&mut Region, CommandError> {
        let count = self.regions.len();
        self.regions
            .get_mut(index)
            .ok_or(CommandError::NoSuchRegion { index, count })
    }

    pub fn apply(
        &mut self,
        command: MonitorCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, CommandError> {
        let mute_timeout = self.global.settings.mute_timeout();

        match command {
            MonitorCommand::TogglePause => {
                Ok(CommandOutcome::GlobalPause(self.global.toggle_pause(now)))
            }
            MonitorCommand::ToggleRegionPause(index) => {
                let region = self.region_mut(index)?;
                region.paused = !region.paused;
                let (paused, name) = (region.paused, region.display_name(index));
                if paused {
                    self.global.reminder.reset(now);
                }
                Ok(CommandOutcome::RegionPause { name, paused })
            }
            MonitorCommand::ToggleMuteSound(index) => {
                let region = self.region_mut(index)?;
                let muted = region.mute_sound.toggle(now, mute_timeout);
                Ok(CommandOutcome::SoundMute {
                    name: region.display_name(index),
                    muted,
                })
            }
            MonitorCommand::ToggleMuteTts(index) => {
                let region = self.region_mut(index)?;
                let muted = region.mute_tts.toggle(now, mute_timeout);
                Ok(CommandOutcome::TtsMute {
                    name: region.display_name(index),
                    muted,
                })
            }
            MonitorCommand::AddRegion { name, rect } => {
                self.regions.push(Region::new(name, rect));
                let index = self.regions.len() - 1;
                Ok(CommandOutcome::RegionAdded {
                    name: self.regions[index].display_name(index),
                    index,
                })
            }
            MonitorCommand::RemoveRegion(index) => {
                let name = self.region_mut(index)?.display_name(index);
                self.regions.remove(index);
                Ok(CommandOutcome::RegionRemoved { name })
            }
            MonitorCommand::EditRegion {
                index,
                name,
                sound_file,
                tts_message,
            } => {
                let region = self.region_mut(index)?;
                region.edit(name, sound_file, tts_message);
                Ok(CommandOutcome::RegionEdited {
                    name: region.display_name(index),
                })
            }
            MonitorCommand::UpdateSettings(settings) => {
                self.apply_settings(settings);
                Ok(CommandOutcome::SettingsUpdated)
            }
            MonitorCommand::Refresh => Ok(CommandOutcome::Refreshed),
        }
    }
}
