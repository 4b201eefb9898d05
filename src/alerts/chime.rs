use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;
/// Kept well below alert sounds so the reminder reads as a nudge.
const AMPLITUDE: f32 = 0.2;

/// (frequency Hz, duration ms); 0 Hz is silence.
const NOTES: [(f32, u64); 3] = [(800.0, 200), (0.0, 100), (600.0, 300)];

/// Two-tone "still paused" chime: 800 Hz, a short gap, then 600 Hz.
pub struct ReminderChime {
    num_sample: usize,
    boundaries: [usize; 3],
}

impl ReminderChime {
    pub fn new() -> Self {
        let mut end = 0;
        let mut boundaries = [0; 3];
        for (slot, (_, ms)) in boundaries.iter_mut().zip(NOTES) {
            end += (SAMPLE_RATE as u64 * ms / 1000) as usize;
            *slot = end;
        }
        Self {
            num_sample: 0,
            boundaries,
        }
    }

    fn total_samples(&self) -> usize {
        self.boundaries[NOTES.len() - 1]
    }
}

impl Default for ReminderChime {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for ReminderChime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.num_sample;
        let note = self.boundaries.iter().position(|&end| n < end)?;
        self.num_sample += 1;

        let freq = NOTES[note].0;
        if freq == 0.0 {
            return Some(0.0);
        }
        let t = n as f32 / SAMPLE_RATE as f32;
        Some((2.0 * PI * freq * t).sin() * AMPLITUDE)
    }
}

impl Source for ReminderChime {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples().saturating_sub(self.num_sample))
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        let ms: u64 = NOTES.iter().map(|(_, ms)| ms).sum();
        Some(Duration::from_millis(ms))
    }
}
