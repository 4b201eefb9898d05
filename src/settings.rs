use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};
use uuid::Uuid;

use crate::engine::{saturating_minutes, saturating_seconds, AlertTracker, MuteTimer};
use crate::models::{Rect, Region, RegionStatusKind};
use crate::similarity::CompareMode;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const DEFAULT_CONFIG_FILE: &str = "screenalert_config.json";
/// Ticks faster than this are clamped; the loop is not meant to be real-time.
const MIN_INTERVAL_MS: u64 = 100;
const MAX_INTERVAL_MS: u64 = 3_600_000;
const MAX_DISPLAY_SECONDS: u64 = 86_400;
const MAX_REMINDER_SECONDS: u64 = 86_400;
const MAX_MUTE_MINUTES: u64 = 7 * 24 * 60;

/// Label and color shown for each region state. Carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusStyle {
    pub green_text: String,
    pub green_color: String,
    pub paused_text: String,
    pub paused_color: String,
    pub alert_text: String,
    pub alert_color: String,
}

impl Default for StatusStyle {
    fn default() -> Self {
        Self {
            green_text: "Green".into(),
            green_color: "#080".into(),
            paused_text: "Paused".into(),
            paused_color: "#08f".into(),
            alert_text: "Alert".into(),
            alert_color: "#a00".into(),
        }
    }
}

impl StatusStyle {
    pub fn for_status(&self, status: RegionStatusKind) -> (&str, &str) {
        match status {
            RegionStatusKind::Normal => (&self.green_text, &self.green_color),
            RegionStatusKind::Paused => (&self.paused_text, &self.paused_color),
            RegionStatusKind::Alerting => (&self.alert_text, &self.alert_color),
        }
    }
}

/// Global knobs of the monitor. Everything except `regions` in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub interval_ms: u64,
    pub alert_display_seconds: u64,
    pub alert_threshold: f64,
    pub default_sound: String,
    pub default_tts: String,
    pub pause_reminder_interval_seconds: u64,
    pub mute_timeout_minutes: u64,
    pub compare_mode: CompareMode,
    pub ocr_enabled: bool,
    #[serde(flatten)]
    pub style: StatusStyle,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            alert_display_seconds: 5,
            alert_threshold: 0.99,
            default_sound: String::new(),
            default_tts: "Alert {name}".into(),
            pause_reminder_interval_seconds: 60,
            mute_timeout_minutes: 10,
            compare_mode: CompareMode::default(),
            ocr_enabled: false,
            style: StatusStyle::default(),
        }
    }
}

impl MonitorSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS))
    }

    pub fn display_window(&self) -> TimeDelta {
        saturating_seconds(self.alert_display_seconds)
    }

    pub fn mute_timeout(&self) -> TimeDelta {
        saturating_minutes(self.mute_timeout_minutes)
    }

    fn from_object(obj: &Map<String, Value>) -> Self {
        let defaults = Self::default();

        let interval_ms = bounded(
            obj,
            &["interval_ms", "interval"],
            defaults.interval_ms,
            1..=MAX_INTERVAL_MS,
        );

        let alert_threshold = field(obj, &["alert_threshold"], defaults.alert_threshold);
        let alert_threshold = if (0.0..=1.0).contains(&alert_threshold) {
            alert_threshold
        } else {
            log_warn!(
                "config field `alert_threshold` = {alert_threshold} is outside [0, 1]; using default"
            );
            defaults.alert_threshold
        };

        let style = StatusStyle {
            green_text: field(obj, &["green_text"], defaults.style.green_text),
            green_color: field(obj, &["green_color"], defaults.style.green_color),
            paused_text: field(obj, &["paused_text"], defaults.style.paused_text),
            paused_color: field(obj, &["paused_color"], defaults.style.paused_color),
            alert_text: field(obj, &["alert_text"], defaults.style.alert_text),
            alert_color: field(obj, &["alert_color"], defaults.style.alert_color),
        };

        Self {
            interval_ms,
            alert_display_seconds: bounded(
                obj,
                &["alert_display_seconds", "highlight_time"],
                defaults.alert_display_seconds,
                0..=MAX_DISPLAY_SECONDS,
            ),
            alert_threshold,
            default_sound: field(obj, &["default_sound"], defaults.default_sound),
            default_tts: field(obj, &["default_tts"], defaults.default_tts),
            pause_reminder_interval_seconds: bounded(
                obj,
                &["pause_reminder_interval_seconds", "pause_reminder_interval"],
                defaults.pause_reminder_interval_seconds,
                0..=MAX_REMINDER_SECONDS,
            ),
            mute_timeout_minutes: bounded(
                obj,
                &["mute_timeout_minutes"],
                defaults.mute_timeout_minutes,
                0..=MAX_MUTE_MINUTES,
            ),
            compare_mode: field(obj, &["compare_mode"], defaults.compare_mode),
            ocr_enabled: field(obj, &["ocr_enabled"], defaults.ocr_enabled),
            style,
        }
    }
}

/// Persisted form of a region. Times are epoch seconds, 0 meaning unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub id: Uuid,
    pub name: String,
    pub rect: Rect,
    pub paused: bool,
    pub mute_sound: bool,
    pub mute_tts: bool,
    pub mute_sound_until: f64,
    pub mute_tts_until: f64,
    pub last_alert_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_message: Option<String>,
}

impl RegionConfig {
    pub fn from_region(region: &Region) -> Self {
        let sound_until = region.mute_sound.deadline();
        let tts_until = region.mute_tts.deadline();
        Self {
            id: region.id,
            name: region.name.clone(),
            rect: region.rect,
            paused: region.paused,
            mute_sound: sound_until.is_some(),
            mute_tts: tts_until.is_some(),
            mute_sound_until: to_epoch(sound_until),
            mute_tts_until: to_epoch(tts_until),
            last_alert_time: to_epoch(region.alert.last_alert_time),
            sound_file: region.sound_file.clone(),
            tts_message: region.tts_message.clone(),
        }
    }

    /// Builds a live region. Alert state always starts `Normal`.
    pub fn into_region(self) -> Region {
        let mut region = Region::new(self.name, self.rect);
        region.id = self.id;
        region.paused = self.paused;
        region.alert = AlertTracker {
            last_alert_time: from_epoch(self.last_alert_time),
            ..AlertTracker::new()
        };
        if self.mute_sound {
            region.mute_sound = MuteTimer::until(from_epoch(self.mute_sound_until));
        }
        if self.mute_tts {
            region.mute_tts = MuteTimer::until(from_epoch(self.mute_tts_until));
        }
        region.sound_file = self.sound_file.filter(|s| !s.trim().is_empty());
        region.tts_message = self.tts_message.filter(|s| !s.trim().is_empty());
        region
    }

    fn from_value(index: usize, value: &Value) -> Option<Self> {
        // Oldest config files stored bare rectangles.
        if value.is_array() {
            return match serde_json::from_value::<Rect>(value.clone()) {
                Ok(rect) => Some(Self::bare(rect)),
                Err(err) => {
                    log_warn!("dropping region #{}: {err}", index + 1);
                    None
                }
            };
        }

        let Some(obj) = value.as_object() else {
            log_warn!("dropping region #{}: not an object", index + 1);
            return None;
        };

        let rect = match obj.get("rect").map(|raw| serde_json::from_value::<Rect>(raw.clone())) {
            Some(Ok(rect)) => rect,
            Some(Err(err)) => {
                log_warn!("dropping region #{}: {err}", index + 1);
                return None;
            }
            None => {
                log_warn!("dropping region #{}: no rect", index + 1);
                return None;
            }
        };

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::new_v4);

        Some(Self {
            id,
            name: field(obj, &["name"], String::new()),
            rect,
            paused: field(obj, &["paused"], false),
            mute_sound: field(obj, &["mute_sound"], false),
            mute_tts: field(obj, &["mute_tts"], false),
            mute_sound_until: field(obj, &["mute_sound_until"], 0.0),
            mute_tts_until: field(obj, &["mute_tts_until"], 0.0),
            last_alert_time: field(obj, &["last_alert_time"], 0.0),
            sound_file: field(obj, &["sound_file"], None),
            tts_message: field(obj, &["tts_message"], None),
        })
    }

    fn bare(rect: Rect) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            rect,
            paused: false,
            mute_sound: false,
            mute_tts: false,
            mute_sound_until: 0.0,
            mute_tts_until: 0.0,
            last_alert_time: 0.0,
            sound_file: None,
            tts_message: None,
        }
    }
}

/// Whole config file: global settings flattened next to `regions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub settings: MonitorSettings,
    pub regions: Vec<RegionConfig>,
}

impl AppConfig {
    /// Reads every field independently; bad fields fall back to their defaults.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            log_warn!("config root is not an object; using defaults");
            return Self::default();
        };

        let regions = match obj.get("regions") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| RegionConfig::from_value(index, item))
                .collect(),
            Some(_) => {
                log_warn!("config field `regions` is not a list; ignoring it");
                Vec::new()
            }
            None => Vec::new(),
        };

        Self {
            settings: MonitorSettings::from_object(obj),
            regions,
        }
    }

    pub fn from_regions(settings: MonitorSettings, regions: &[Region]) -> Self {
        Self {
            settings,
            regions: regions.iter().map(RegionConfig::from_region).collect(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppConfig>,
}

impl SettingsStore {
    /// Loads the file at `path`. Never fails: a missing or unreadable file
    /// means defaults.
    pub fn open(path: PathBuf) -> Self {
        let data = if path.exists() {
            match read_config(&path) {
                Ok(config) => config,
                Err(err) => {
                    log_warn!("{err:#}; using default settings");
                    AppConfig::default()
                }
            }
        } else {
            AppConfig::default()
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> AppConfig {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save(&self, config: AppConfig) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = config;
        self.persist(&guard)
    }

    fn persist(&self, data: &AppConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
    Ok(AppConfig::from_value(&value))
}

/// First present key wins; an invalid value yields `default` with a warning.
fn field<T: DeserializeOwned>(obj: &Map<String, Value>, keys: &[&str], default: T) -> T {
    for key in keys {
        let Some(raw) = obj.get(*key) else {
            continue;
        };
        return match serde_json::from_value(raw.clone()) {
            Ok(value) => value,
            Err(err) => {
                log_warn!("config field `{key}` is invalid ({err}); using default");
                default
            }
        };
    }
    default
}

/// Like `field`, but values outside `range` also fall back to the default.
fn bounded(
    obj: &Map<String, Value>,
    keys: &[&str],
    default: u64,
    range: RangeInclusive<u64>,
) -> u64 {
    let value = field(obj, keys, default);
    if range.contains(&value) {
        value
    } else {
        log_warn!(
            "config field `{}` = {value} is outside {}..={}; using default",
            keys[0],
            range.start(),
            range.end()
        );
        default
    }
}

pub fn to_epoch(time: Option<DateTime<Utc>>) -> f64 {
    time.map_or(0.0, |t| t.timestamp_millis() as f64 / 1000.0)
}

pub fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}
