use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::engine::{AlertTracker, MuteTimer};
use crate::similarity::ComparisonResult;

pub type RegionId = Uuid;

/// Screen rectangle in source-image pixels. Serialized as `[left, top, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i64; 4]", into = "[i64; 4]")]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRect(pub [i64; 4]);

impl fmt::Display for InvalidRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [l, t, w, h] = self.0;
        write!(f, "degenerate rect [{l}, {t}, {w}, {h}]")
    }
}

impl std::error::Error for InvalidRect {}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Result<Self, InvalidRect> {
        Self::try_from([left as i64, top as i64, width as i64, height as i64])
    }

    /// Crops this rectangle out of `frame`. Parts outside the frame are cut
    /// off, so the crop can come back smaller than the rect (or empty).
    pub fn crop(&self, frame: &DynamicImage) -> DynamicImage {
        frame.crop_imm(self.left, self.top, self.width, self.height)
    }
}

impl TryFrom<[i64; 4]> for Rect {
    type Error = InvalidRect;

    fn try_from(raw: [i64; 4]) -> Result<Self, Self::Error> {
        let [left, top, width, height] = raw;
        let fits = |v: i64| u32::try_from(v).ok();
        match (fits(left), fits(top), fits(width), fits(height)) {
            (Some(left), Some(top), Some(width), Some(height)) if width > 0 && height > 0 => {
                Ok(Self {
                    left,
                    top,
                    width,
                    height,
                })
            }
            _ => Err(InvalidRect(raw)),
        }
    }
}

impl From<Rect> for [i64; 4] {
    fn from(rect: Rect) -> Self {
        [
            rect.left as i64,
            rect.top as i64,
            rect.width as i64,
            rect.height as i64,
        ]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.left, self.top)
    }
}

/// Coarse status for display; orthogonal flags collapse into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionStatusKind {
    Normal,
    Paused,
    Alerting,
}

/// One monitored rectangle and everything the engine tracks about it.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub rect: Rect,
    pub paused: bool,
    pub alert: AlertTracker,
    pub mute_sound: MuteTimer,
    pub mute_tts: MuteTimer,
    pub sound_file: Option<String>,
    pub tts_message: Option<String>,
    pub last_result: Option<ComparisonResult>,
    baseline: Option<DynamicImage>,
}

impl Region {
    pub fn new(name: impl Into<String>, rect: Rect) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            rect,
            paused: false,
            alert: AlertTracker::new(),
            mute_sound: MuteTimer::default(),
            mute_tts: MuteTimer::default(),
            sound_file: None,
            tts_message: None,
            last_result: None,
            baseline: None,
        }
    }

    /// The name, or `Region N` (1-based) when it is blank.
    pub fn display_name(&self, index: usize) -> String {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            format!("Region {}", index + 1)
        } else {
            trimmed.to_string()
        }
    }

    pub fn baseline(&self) -> Option<&DynamicImage> {
        self.baseline.as_ref()
    }

    /// Swaps in the newest crop and hands back the previous one.
    pub fn replace_baseline(&mut self, crop: DynamicImage) -> Option<DynamicImage> {
        self.baseline.replace(crop)
    }

    pub fn status(&self) -> RegionStatusKind {
        if self.paused {
            RegionStatusKind::Paused
        } else if self.alert.is_alerting() {
            RegionStatusKind::Alerting
        } else {
            RegionStatusKind::Normal
        }
    }

    /// `None` leaves a field as it is. A blank override is dropped, so the
    /// global default applies again.
    pub fn edit(
        &mut self,
        name: Option<String>,
        sound_file: Option<String>,
        tts_message: Option<String>,
    ) {
        if let Some(name) = name {
            self.name = name.trim().to_string();
        }
        if let Some(sound_file) = sound_file {
            self.sound_file = non_blank(sound_file);
        }
        if let Some(tts_message) = tts_message {
            self.tts_message = non_blank(tts_message);
        }
    }

    pub fn sound_muted(&mut self, now: DateTime<Utc>) -> bool {
        self.mute_sound.is_active(now)
    }

    pub fn tts_muted(&mut self, now: DateTime<Utc>) -> bool {
        self.mute_tts.is_active(now)
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use image::{GenericImageView, Rgb, RgbImage};

    #[test]
    fn rect_rejects_degenerate_and_negative() {
        assert!(Rect::try_from([0, 0, 0, 10]).is_err());
        assert!(Rect::try_from([0, 0, 10, -1]).is_err());
        assert!(Rect::try_from([-5, 0, 10, 10]).is_err());
        assert_eq!(
            Rect::try_from([1, 2, 3, 4]).unwrap(),
            Rect {
                left: 1,
                top: 2,
                width: 3,
                height: 4
            }
        );
    }

    #[test]
    fn rect_serializes_as_array() {
        let rect = Rect::new(10, 20, 30, 40).unwrap();
        assert_eq!(serde_json::to_string(&rect).unwrap(), "[10,20,30,40]");
        let back: Rect = serde_json::from_str("[10,20,30,40]").unwrap();
        assert_eq!(back, rect);
        assert!(serde_json::from_str::<Rect>("[10,20,0,40]").is_err());
    }

    #[test]
    fn crop_is_clipped_to_frame() {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([1, 2, 3])));
        let inside = Rect::new(10, 10, 20, 20).unwrap().crop(&frame);
        assert_eq!(inside.dimensions(), (20, 20));
        let overhanging = Rect::new(40, 30, 20, 20).unwrap().crop(&frame);
        assert_eq!(overhanging.dimensions(), (10, 10));
    }

    #[test]
    fn blank_name_falls_back_to_position() {
        let rect = Rect::new(0, 0, 1, 1).unwrap();
        assert_eq!(Region::new("  ", rect).display_name(2), "Region 3");
        assert_eq!(Region::new("Chat", rect).display_name(2), "Chat");
    }

    #[test]
    fn status_prefers_paused_over_alerting() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut region = Region::new("r", Rect::new(0, 0, 1, 1).unwrap());
        assert_eq!(region.status(), RegionStatusKind::Normal);

        let (alert, _) = region.alert.observe(true, now, TimeDelta::seconds(5));
        region.alert = alert;
        assert_eq!(region.status(), RegionStatusKind::Alerting);

        region.paused = true;
        assert_eq!(region.status(), RegionStatusKind::Paused);
    }

    #[test]
    fn edit_touches_only_given_fields() {
        let mut region = Region::new("old", Rect::new(0, 0, 1, 1).unwrap());
        region.sound_file = Some("/a.wav".into());

        region.edit(Some(" Chat ".into()), None, Some("Chat moved".into()));
        assert_eq!(region.name, "Chat");
        assert_eq!(region.sound_file.as_deref(), Some("/a.wav"));
        assert_eq!(region.tts_message.as_deref(), Some("Chat moved"));

        region.edit(None, Some("  ".into()), Some(String::new()));
        assert_eq!(region.name, "Chat");
        assert_eq!(region.sound_file, None);
        assert_eq!(region.tts_message, None);
    }

    #[test]
    fn baseline_replacement_returns_previous() {
        let mut region = Region::new("r", Rect::new(0, 0, 1, 1).unwrap());
        let a = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        let b = DynamicImage::ImageRgb8(RgbImage::new(3, 3));
        assert!(region.replace_baseline(a).is_none());
        let prev = region.replace_baseline(b).unwrap();
        assert_eq!(prev.dimensions(), (2, 2));
        assert_eq!(region.baseline().unwrap().dimensions(), (3, 3));
    }
}
