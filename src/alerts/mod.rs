//! Sound and speech side effects of an alert.
//!
//! Sinks must return quickly: the tick loop calls them inline and never
//! waits for playback or speech to finish.

pub mod audio;
pub mod chime;
pub mod speech;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::models::Region;
use crate::settings::MonitorSettings;

pub use audio::AlertAudioHandle;
pub use speech::{CommandSpeaker, Speaker, SpeechSlot};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const NAME_PLACEHOLDER: &str = "{name}";

pub trait AlertSink: Send + Sync {
    /// Plays a sound file. Empty path is a no-op.
    fn play_sound(&self, path: &str) -> Result<()>;
    /// Speaks `text` unless speech is already in progress. Returns whether
    /// the utterance was started; empty text is a no-op and returns `false`.
    fn speak(&self, text: &str) -> Result<bool>;
    /// The low-key "something is paused" chime.
    fn play_reminder(&self) -> Result<()>;
}

/// Speakers and the platform speech command.
pub struct SystemAlertSink {
    audio: AlertAudioHandle,
    speech: SpeechSlot,
}

impl SystemAlertSink {
    pub fn new() -> Self {
        Self::with_speaker(Arc::new(CommandSpeaker::default()))
    }

    pub fn with_speaker(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            audio: AlertAudioHandle::new(),
            speech: SpeechSlot::new(speaker),
        }
    }

    pub fn shutdown(&self) {
        self.audio.shutdown();
    }
}

impl Default for SystemAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for SystemAlertSink {
    fn play_sound(&self, path: &str) -> Result<()> {
        self.audio.play_file(path)
    }

    fn speak(&self, text: &str) -> Result<bool> {
        self.speech.try_speak(text)
    }

    fn play_reminder(&self) -> Result<()> {
        self.audio.play_reminder()
    }
}

/// Which channels actually went out for one alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub sound: bool,
    pub speech: bool,
}

/// Applies mute gates and defaults, then hands off to the sink.
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Called once per newly fired alert. Sink failures are logged, not returned.
    pub fn dispatch(
        &self,
        region: &mut Region,
        index: usize,
        settings: &MonitorSettings,
        now: DateTime<Utc>,
    ) -> Dispatched {
        let mut sent = Dispatched::default();
        let name = region.display_name(index);

        if !region.sound_muted(now) {
            let sound = sound_for(region, settings);
            if !sound.is_empty() {
                match self.sink.play_sound(sound) {
                    Ok(()) => sent.sound = true,
                    Err(err) => log_warn!("sound for {name} failed: {err:#}"),
                }
            }
        }

        if !region.tts_muted(now) {
            let message = message_for(region, settings, &name);
            if !message.trim().is_empty() {
                match self.sink.speak(&message) {
                    Ok(true) => sent.speech = true,
                    Ok(false) => log_debug!("speech busy, {name} not announced"),
                    Err(err) => log_warn!("speech for {name} failed: {err:#}"),
                }
            }
        }

        sent
    }

    pub fn remind(&self) {
        if let Err(err) = self.sink.play_reminder() {
            log_warn!("pause reminder failed: {err:#}");
        }
    }
}

fn sound_for<'a>(region: &'a Region, settings: &'a MonitorSettings) -> &'a str {
    region
        .sound_file
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(settings.default_sound.trim())
}

fn message_for(region: &Region, settings: &MonitorSettings, name: &str) -> String {
    let template = region
        .tts_message
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&settings.default_tts);
    template.replace(NAME_PLACEHOLDER, name)
}
