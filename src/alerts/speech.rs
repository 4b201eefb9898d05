use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const SPEECH_TIMEOUT_SECS: u64 = 30;

/// Blocking text-to-speech backend. Runs on the speech thread only.
pub trait Speaker: Send + Sync {
    fn say(&self, text: &str) -> Result<()>;
}

/// Shells out to the platform speech command, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    timeout: Duration,
}

impl Default for CommandSpeaker {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(SPEECH_TIMEOUT_SECS),
        }
    }
}

impl CommandSpeaker {
    fn command(text: &str) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("say");
            cmd.arg(text);
            cmd
        } else if cfg!(target_os = "windows") {
            // The text goes through the environment so it is never parsed as script.
            let mut cmd = Command::new("powershell");
            cmd.args([
                "-NoProfile",
                "-Command",
                "Add-Type -AssemblyName System.Speech; \
                 $s = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
                 $s.Speak($env:SCREEN_ALERT_TTS)",
            ])
            .env("SCREEN_ALERT_TTS", text);
            cmd
        } else {
            let mut cmd = Command::new("espeak");
            cmd.arg("--").arg(text);
            cmd
        }
    }
}

impl Speaker for CommandSpeaker {
    fn say(&self, text: &str) -> Result<()> {
        let mut cmd = Self::command(text);
        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;

        match child.wait_timeout(self.timeout)? {
            Some(status) if status.success() => Ok(()),
            Some(status) => bail!("{program} exited with {status}"),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("{program} timed out after {}s", self.timeout.as_secs())
            }
        }
    }
}

/// Single-flight speech: while one utterance plays, new ones are dropped.
#[derive(Clone)]
pub struct SpeechSlot {
    speaker: Arc<dyn Speaker>,
    busy: Arc<AtomicBool>,
}

impl SpeechSlot {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Starts speaking `text` in the background. Returns `false` when the
    /// slot was occupied and the request was dropped.
    pub fn try_speak(&self, text: &str) -> Result<bool> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log_debug!("speech busy, dropping {text:?}");
            return Ok(false);
        }

        let speaker = Arc::clone(&self.speaker);
        let busy = BusyGuard(Arc::clone(&self.busy));
        let text = text.to_string();
        let spawned = thread::Builder::new()
            .name("alert-speech".to_string())
            .spawn(move || {
                let _busy = busy;
                if let Err(err) = speaker.say(&text) {
                    log_warn!("speech failed: {err:#}");
                }
            });

        if let Err(err) = spawned {
            self.busy.store(false, Ordering::SeqCst);
            return Err(err).context("failed to spawn speech thread");
        }
        Ok(true)
    }
}

/// Frees the slot when the speech thread ends, panics included.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Mutex};
    use std::time::Instant;

    /// Blocks inside `say` until the test releases it.
    struct GatedSpeaker {
        spoken: Mutex<Vec<String>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedSpeaker {
        fn new() -> (Arc<Self>, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let speaker = Arc::new(Self {
                spoken: Mutex::new(Vec::new()),
                gate: Mutex::new(rx),
            });
            (speaker, tx)
        }
    }

    impl Speaker for GatedSpeaker {
        fn say(&self, text: &str) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            let _ = self.gate.lock().unwrap().recv();
            Ok(())
        }
    }

    fn wait_idle(slot: &SpeechSlot) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while slot.is_busy() {
            assert!(Instant::now() < deadline, "speech never finished");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn second_request_is_dropped_while_speaking() {
        let (speaker, release) = GatedSpeaker::new();
        let slot = SpeechSlot::new(speaker.clone());

        assert!(slot.try_speak("first").unwrap());
        assert!(slot.is_busy());
        assert!(!slot.try_speak("second").unwrap());

        release.send(()).unwrap();
        wait_idle(&slot);

        assert!(slot.try_speak("third").unwrap());
        release.send(()).unwrap();
        wait_idle(&slot);

        assert_eq!(*speaker.spoken.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn blank_text_never_occupies_the_slot() {
        let (speaker, _release) = GatedSpeaker::new();
        let slot = SpeechSlot::new(speaker);
        assert!(!slot.try_speak("  ").unwrap());
        assert!(!slot.is_busy());
    }

    struct FailingSpeaker;

    impl Speaker for FailingSpeaker {
        fn say(&self, _text: &str) -> Result<()> {
            bail!("no speech engine")
        }
    }

    #[test]
    fn failure_frees_the_slot() {
        let slot = SpeechSlot::new(Arc::new(FailingSpeaker));
        assert!(slot.try_speak("hello").unwrap());
        wait_idle(&slot);
        assert!(slot.try_speak("again").unwrap());
    }

    struct PanickingSpeaker;

    impl Speaker for PanickingSpeaker {
        fn say(&self, _text: &str) -> Result<()> {
            panic!("speech backend blew up")
        }
    }

    #[test]
    fn panic_in_speaker_frees_the_slot() {
        let slot = SpeechSlot::new(Arc::new(PanickingSpeaker));
        assert!(slot.try_speak("hello").unwrap());
        wait_idle(&slot);
        assert!(slot.try_speak("again").unwrap());
    }
}
