use anyhow::{anyhow, bail, Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex, PoisonError,
};
use std::thread;

use super::chime::ReminderChime;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

type AlertSource = Box<dyn Source<Item = f32> + Send>;

enum AudioCommand {
    PlayFile(PathBuf),
    PlayReminder,
}

/// Owns a dedicated playback thread; rodio's output stream is not `Send`.
///
/// Sounds overlap freely: each request gets its own detached sink, so the
/// caller never waits for playback.
#[derive(Clone)]
pub struct AlertAudioHandle {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
}

impl AlertAudioHandle {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>> {
        let mut slot = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = slot.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("alert-audio".to_string())
            .spawn(move || {
                let mut output: Option<(OutputStream, OutputStreamHandle)> = None;

                while let Ok(cmd) = rx.recv() {
                    let source: AlertSource = match cmd {
                        AudioCommand::PlayFile(path) => match decode(&path) {
                            Ok(source) => source,
                            Err(err) => {
                                log_warn!("alert sound skipped: {err:#}");
                                continue;
                            }
                        },
                        AudioCommand::PlayReminder => Box::new(ReminderChime::new()),
                    };
                    if let Err(err) = start(&mut output, source) {
                        log_warn!("alert playback failed: {err:#}");
                        // a broken device is reopened on the next request
                        output = None;
                    }
                }
            })
            .context("failed to spawn audio thread")?;

        *slot = Some(tx.clone());
        Ok(tx)
    }

    /// Queues a sound file. An empty path is a no-op.
    pub fn play_file(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Ok(());
        }
        let path = PathBuf::from(path);
        if !path.is_file() {
            bail!("sound file {} not found", path.display());
        }
        self.send(AudioCommand::PlayFile(path))
    }

    pub fn play_reminder(&self) -> Result<()> {
        self.send(AudioCommand::PlayReminder)
    }

    /// Closes the channel; the thread exits after draining queued sounds.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn send(&self, cmd: AudioCommand) -> Result<()> {
        let tx = self.ensure_thread()?;
        tx.send(cmd).map_err(|_| anyhow!("audio thread is gone"))
    }
}

impl Default for AlertAudioHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_output(
    output: &mut Option<(OutputStream, OutputStreamHandle)>,
) -> Result<&OutputStreamHandle> {
    if output.is_none() {
        let opened = OutputStream::try_default().context("failed to open audio output")?;
        *output = Some(opened);
    }
    output
        .as_ref()
        .map(|(_, handle)| handle)
        .ok_or_else(|| anyhow!("audio output unavailable"))
}

fn decode(path: &Path) -> Result<AlertSource> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let source = Decoder::new(BufReader::new(file))
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(Box::new(source.convert_samples()))
}

/// Only device trouble fails here; sounds already playing are unaffected.
fn start(
    output: &mut Option<(OutputStream, OutputStreamHandle)>,
    source: AlertSource,
) -> Result<()> {
    let handle = ensure_output(output)?;
    let sink = Sink::try_new(handle).context("failed to create audio sink")?;
    sink.append(source);
    sink.detach();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_a_no_op() {
        let audio = AlertAudioHandle::new();
        assert!(audio.play_file("").is_ok());
        assert!(audio.play_file("   ").is_ok());
    }

    #[test]
    fn missing_file_is_reported_without_touching_the_device() {
        let audio = AlertAudioHandle::new();
        let err = audio.play_file("/definitely/not/here.wav").unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(audio.tx.lock().unwrap().is_none());
    }

    #[test]
    fn undecodable_file_fails_before_reaching_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not audio at all").unwrap();

        let err = decode(&path).err().unwrap();
        assert!(format!("{err:#}").contains("failed to decode"));
    }
}
