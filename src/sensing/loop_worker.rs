use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertDispatcher, AlertSink};
use crate::metrics::{MetricsCollector, SystemMetrics, TickMetrics};
use crate::models::{GlobalMonitorState, MonitorSnapshot, Region};
use crate::ocr::OcrEngine;
use crate::settings::{AppConfig, MonitorSettings, SettingsStore};
use crate::similarity::{ScorerConfig, SimilarityScorer};

use super::capture::CaptureSource;
use super::commands::{CommandError, CommandOutcome, MonitorCommand};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// A command plus where to send its outcome.
pub struct ControlMessage {
    pub command: MonitorCommand,
    pub reply: Option<oneshot::Sender<Result<CommandOutcome, CommandError>>>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub reminder_played: bool,
    /// Global pause: no capture happened.
    pub skipped: bool,
    pub capture_failed: bool,
    pub regions_compared: usize,
    /// Indices of regions whose alert fired this tick.
    pub alerts: Vec<usize>,
    pub capture_ms: u64,
    pub compare_ms: u64,
    pub total_ms: u64,
}

impl TickReport {
    fn to_metrics(&self, timestamp: DateTime<Utc>, system: SystemMetrics) -> TickMetrics {
        TickMetrics {
            timestamp,
            capture_ms: self.capture_ms,
            compare_ms: self.compare_ms,
            total_ms: self.total_ms,
            regions_compared: self.regions_compared,
            alerts_fired: self.alerts.len(),
            capture_failed: self.capture_failed,
            reminder_played: self.reminder_played,
            cpu_percent: system.cpu_percent,
            memory_mb: system.memory_mb,
        }
    }
}

/// All mutable monitoring state. Owned by exactly one task at a time.
pub struct Monitor {
    pub global: GlobalMonitorState,
    pub regions: Vec<Region>,
    scorer: SimilarityScorer,
    dispatcher: AlertDispatcher,
    capture: Box<dyn CaptureSource>,
    ocr: Option<Arc<dyn OcrEngine>>,
    tick: u64,
}

impl Monitor {
    pub fn new(
        config: AppConfig,
        capture: Box<dyn CaptureSource>,
        sink: Arc<dyn AlertSink>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        let scorer = build_scorer(&config.settings, ocr.as_ref());
        Self {
            global: GlobalMonitorState::new(config.settings),
            regions: config
                .regions
                .into_iter()
                .map(|region| region.into_region())
                .collect(),
            scorer,
            dispatcher: AlertDispatcher::new(sink),
            capture,
            ocr,
            tick: 0,
        }
    }

    pub fn apply_settings(&mut self, settings: MonitorSettings) {
        self.scorer = build_scorer(&settings, self.ocr.as_ref());
        self.global.apply_settings(settings);
    }

    pub fn to_config(&self) -> AppConfig {
        AppConfig::from_regions(self.global.settings.clone(), &self.regions)
    }

    pub fn snapshot(&mut self, now: DateTime<Utc>) -> MonitorSnapshot {
        MonitorSnapshot::observe(&self.global, &mut self.regions, now, self.tick)
    }

    /// One capture, compare and dispatch pass over every region.
    ///
    /// Reminders are served even under global pause; nothing else is.
    /// Every active region crops the same frame.
    pub fn run_tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let start = Instant::now();
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let anything_paused = self.global.anything_paused(&self.regions);
        if self.global.reminder.poll(anything_paused, now) {
            log_info!("pause reminder");
            self.dispatcher.remind();
            report.reminder_played = true;
        }

        if self.global.paused || self.regions.iter().all(|r| r.paused) {
            report.skipped = self.global.paused;
            report.total_ms = start.elapsed().as_millis() as u64;
            return report;
        }

        let capture_start = Instant::now();
        let frame = self.capture.capture_frame();
        report.capture_ms = capture_start.elapsed().as_millis() as u64;
        report.capture_failed = frame.filler;
        if frame.filler {
            log_warn!("tick {}: using filler frame", self.tick);
        }

        let threshold = self.global.settings.alert_threshold;
        let display = self.global.settings.display_window();
        let compare_start = Instant::now();

        for (index, region) in self.regions.iter_mut().enumerate() {
            if region.paused {
                continue;
            }

            let crop = region.rect.crop(&frame.image);
            let result = region
                .baseline()
                .map(|prev| self.scorer.compare(prev, &crop));
            region.replace_baseline(crop);

            let Some(result) = result else {
                log_debug!("region {} has no baseline yet", index + 1);
                continue;
            };
            report.regions_compared += 1;

            let is_different = result.is_different(threshold);
            let (alert, transition) = region.alert.observe(is_different, now, display);
            region.alert = alert;

            log_debug!(
                "region {} score={:.4} conf={:.2} {:?} ({})",
                index + 1,
                result.combined,
                result.confidence,
                transition,
                result.diagnostic
            );

            if transition.should_dispatch() {
                let sent = self
                    .dispatcher
                    .dispatch(region, index, &self.global.settings, now);
                log_info!(
                    "alert: {} changed (score {:.4}, sound={}, speech={})",
                    region.display_name(index),
                    result.combined,
                    sent.sound,
                    sent.speech
                );
                report.alerts.push(index);
            }
            region.last_result = Some(result);
        }

        report.compare_ms = compare_start.elapsed().as_millis() as u64;
        report.total_ms = start.elapsed().as_millis() as u64;
        report
    }
}

fn build_scorer(settings: &MonitorSettings, ocr: Option<&Arc<dyn OcrEngine>>) -> SimilarityScorer {
    let scorer = SimilarityScorer::new(ScorerConfig {
        mode: settings.compare_mode,
        ..ScorerConfig::default()
    });
    match ocr {
        Some(engine) if settings.ocr_enabled => scorer.with_ocr(Arc::clone(engine)),
        _ => scorer,
    }
}

async fn tick_off_thread(mut monitor: Monitor) -> Result<(Monitor, TickReport)> {
    tokio::task::spawn_blocking(move || {
        let report = monitor.run_tick(Utc::now());
        (monitor, report)
    })
    .await
    .context("monitor tick worker join failed")
}

fn persist(store: &SettingsStore, monitor: &Monitor) {
    if let Err(err) = store.save(monitor.to_config()) {
        log_warn!("failed to save settings: {err:#}");
    }
}

/// Drives ticks on a fixed interval and serves commands in between.
///
/// Ticks never overlap: a slow tick delays the next one. Commands are
/// applied on this task, so the tick never races with them.
pub async fn monitor_loop(
    mut monitor: Monitor,
    store: Arc<SettingsStore>,
    mut commands: mpsc::Receiver<ControlMessage>,
    snapshots: watch::Sender<MonitorSnapshot>,
    metrics: MetricsCollector,
    cancel_token: CancellationToken,
) {
    let mut period = monitor.global.settings.tick_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!(
        "monitor started: {} regions, every {}ms",
        monitor.regions.len(),
        period.as_millis()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started_at = Utc::now();
                match tick_off_thread(monitor).await {
                    Ok((returned, report)) => {
                        monitor = returned;
                        let system = metrics.sample_system_metrics().await;
                        metrics.record_tick(report.to_metrics(started_at, system)).await;
                        snapshots.send_replace(monitor.snapshot(Utc::now()));
                    }
                    Err(err) => {
                        log_error!("monitor loop aborted: {err:#}");
                        return;
                    }
                }
            }
            Some(message) = commands.recv() => {
                let outcome = monitor.apply(message.command, Utc::now());
                match &outcome {
                    Ok(done) => log_info!("{done}"),
                    Err(err) => log_warn!("command rejected: {err}"),
                }
                if outcome.is_ok() {
                    persist(&store, &monitor);
                }

                let wanted = monitor.global.settings.tick_interval();
                if wanted != period {
                    period = wanted;
                    ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                }

                snapshots.send_replace(monitor.snapshot(Utc::now()));
                if let Some(reply) = message.reply {
                    let _ = reply.send(outcome);
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("monitor loop shutting down");
                persist(&store, &monitor);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::{RecordingSink, SinkCall};
    use crate::models::{Rect, RegionStatusKind};
    use crate::sensing::capture::tests::ScriptedCapture;
    use chrono::{TimeDelta, TimeZone};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::Ordering;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(rgb)))
    }

    fn with_pixel(mut img: DynamicImage, x: u32, y: u32, rgb: [u8; 3]) -> DynamicImage {
        if let DynamicImage::ImageRgb8(buf) = &mut img {
            buf.put_pixel(x, y, Rgb(rgb));
        }
        img
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            default_sound: "/sounds/ding.wav".into(),
            ..MonitorSettings::default()
        }
    }

    fn monitor_with(
        frames: Vec<DynamicImage>,
        regions: Vec<Region>,
    ) -> (Monitor, Arc<RecordingSink>, Arc<std::sync::atomic::AtomicUsize>) {
        let capture = ScriptedCapture::new(frames);
        let captures = Arc::clone(&capture.captures);
        let sink = Arc::new(RecordingSink::default());
        let mut monitor = Monitor::new(
            AppConfig {
                settings: settings(),
                regions: Vec::new(),
            },
            Box::new(capture),
            sink.clone(),
            None,
        );
        monitor.regions = regions;
        (monitor, sink, captures)
    }

    fn region(name: &str, rect: [i64; 4]) -> Region {
        Region::new(name, Rect::try_from(rect).unwrap())
    }

    #[test]
    fn first_observation_only_stores_baseline() {
        let (mut monitor, sink, _) = monitor_with(
            vec![solid(200, 200, [10, 10, 10])],
            vec![region("a", [0, 0, 100, 100])],
        );

        let report = monitor.run_tick(at(0));
        assert_eq!(report.regions_compared, 0);
        assert!(monitor.regions[0].baseline().is_some());
        assert!(monitor.regions[0].last_result.is_none());
        assert!(sink.calls().is_empty());
    }

    #[test]
    fn one_pixel_change_alerts_once() {
        let base = solid(100, 100, [40, 120, 200]);
        let changed = with_pixel(base.clone(), 50, 50, [255, 0, 0]);
        let (mut monitor, sink, _) = monitor_with(
            vec![base, changed.clone(), changed],
            vec![region("hp", [0, 0, 100, 100])],
        );

        monitor.run_tick(at(0));
        let report = monitor.run_tick(at(1));
        assert_eq!(report.alerts, vec![0]);
        assert!(monitor.regions[0].alert.is_alerting());
        assert!(monitor.regions[0].last_result.as_ref().unwrap().combined < 0.99);
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Sound("/sounds/ding.wav".into()),
                SinkCall::Speak("Alert hp".into()),
            ]
        );

        // same image again: no further change, and still inside the display window
        let report = monitor.run_tick(at(2));
        assert!(report.alerts.is_empty());
        assert_eq!(sink.alert_count(), 2);
        assert!(monitor.regions[0].alert.is_alerting());
    }

    #[test]
    fn alert_clears_after_display_window() {
        let base = solid(40, 40, [0, 0, 0]);
        let changed = solid(40, 40, [255, 255, 255]);
        let frames = vec![base, changed.clone(), changed.clone(), changed];
        let (mut monitor, _, _) = monitor_with(frames, vec![region("a", [0, 0, 40, 40])]);

        monitor.run_tick(at(0));
        monitor.run_tick(at(1));
        monitor.run_tick(at(3));
        assert!(monitor.regions[0].alert.is_alerting());
        monitor.run_tick(at(6));
        assert_eq!(monitor.regions[0].status(), RegionStatusKind::Normal);
    }

    #[test]
    fn all_regions_share_one_capture() {
        let (mut monitor, _, captures) = monitor_with(
            vec![solid(100, 100, [1, 1, 1]), solid(100, 100, [1, 1, 1])],
            vec![region("a", [0, 0, 50, 50]), region("b", [50, 50, 50, 50])],
        );
        monitor.run_tick(at(0));
        monitor.run_tick(at(1));
        assert_eq!(captures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn paused_region_is_untouched_while_others_run() {
        let base = solid(100, 100, [0, 0, 0]);
        let changed = solid(100, 100, [255, 255, 255]);
        let (mut monitor, sink, _) = monitor_with(
            vec![base, changed],
            vec![region("a", [0, 0, 50, 50]), region("b", [50, 50, 50, 50])],
        );
        monitor.regions[1].mute_tts.mute_for(at(0), TimeDelta::minutes(10));

        monitor.run_tick(at(0));
        monitor
            .apply(MonitorCommand::ToggleRegionPause(0), at(0))
            .unwrap();
        let baseline_a = monitor.regions[0].baseline().cloned();
        let tracker_a = monitor.regions[0].alert;

        let report = monitor.run_tick(at(1));
        assert_eq!(report.alerts, vec![1]);
        assert_eq!(monitor.regions[0].baseline().cloned(), baseline_a);
        assert_eq!(monitor.regions[0].alert, tracker_a);
        assert_eq!(
            monitor.regions[1].mute_tts.deadline(),
            Some(at(0) + TimeDelta::minutes(10))
        );
        // tts muted on b: only the sound went out
        assert_eq!(sink.calls(), vec![SinkCall::Sound("/sounds/ding.wav".into())]);
    }

    #[test]
    fn global_pause_only_serves_reminders() {
        let (mut monitor, sink, captures) = monitor_with(
            vec![solid(10, 10, [0, 0, 0])],
            vec![region("a", [0, 0, 10, 10])],
        );
        monitor.global.toggle_pause(at(0));

        let report = monitor.run_tick(at(30));
        assert!(report.skipped);
        assert!(!report.reminder_played);

        let report = monitor.run_tick(at(60));
        assert!(report.reminder_played);
        assert_eq!(captures.load(Ordering::SeqCst), 0);
        assert_eq!(sink.calls(), vec![SinkCall::Reminder]);
        assert!(monitor.regions[0].baseline().is_none());
    }

    #[test]
    fn resized_capture_forces_an_alert() {
        let (mut monitor, sink, _) = monitor_with(
            vec![solid(100, 100, [9, 9, 9]), solid(60, 60, [9, 9, 9])],
            vec![region("a", [20, 20, 60, 60])],
        );
        monitor.run_tick(at(0));
        let report = monitor.run_tick(at(1));
        assert_eq!(report.alerts, vec![0]);
        let result = monitor.regions[0].last_result.as_ref().unwrap();
        assert_eq!(result.combined, 0.0);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(sink.alert_count(), 2);
    }

    #[test]
    fn identical_frames_stay_quiet() {
        let img = solid(64, 64, [100, 100, 100]);
        let (mut monitor, sink, _) = monitor_with(
            vec![img.clone(), img.clone(), img],
            vec![region("a", [0, 0, 64, 64])],
        );
        for t in 0..3 {
            assert!(monitor.run_tick(at(t)).alerts.is_empty());
        }
        assert!(sink.calls().is_empty());
        let score = monitor.regions[0].last_result.as_ref().unwrap().combined;
        assert!((score - 1.0).abs() < 1e-6, "{score}");
    }

    #[test]
    fn filler_frame_is_compared_as_content() {
        let grey = solid(50, 50, [0x22, 0x22, 0x22]);
        let (mut monitor, sink, _) =
            monitor_with(vec![grey], vec![region("a", [0, 0, 50, 50])]);

        monitor.run_tick(at(0));
        // the source has run dry: a same-sized filler comes back
        let report = monitor.run_tick(at(1));
        assert!(report.capture_failed);
        assert_eq!(report.regions_compared, 1);
        assert!(report.alerts.is_empty());
        assert!(sink.calls().is_empty());

        let dark = solid(50, 50, [0, 0, 0]);
        let (mut monitor, sink, _) =
            monitor_with(vec![dark], vec![region("a", [0, 0, 50, 50])]);
        monitor.run_tick(at(0));
        let report = monitor.run_tick(at(1));
        assert!(report.capture_failed);
        assert_eq!(report.alerts, vec![0]);
        assert_eq!(sink.alert_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ticks_alert_and_follow_interval_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::open(dir.path().join("config.json")));
        let base = solid(64, 64, [40, 120, 200]);
        let changed = with_pixel(base.clone(), 10, 10, [255, 0, 0]);
        let (monitor, sink, _) =
            monitor_with(vec![base, changed], vec![region("hp", [0, 0, 64, 64])]);

        let (commands, rx) = mpsc::channel(4);
        let (snap_tx, mut snapshots) = watch::channel(MonitorSnapshot::empty());
        let metrics = MetricsCollector::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            monitor,
            store.clone(),
            rx,
            snap_tx,
            metrics.clone(),
            cancel.clone(),
        ));

        // tick 1 stores the baseline, tick 2 sees the changed pixel
        let snapshot = snapshots.wait_for(|s| s.tick >= 2).await.unwrap().clone();
        assert_eq!(snapshot.regions[0].status, RegionStatusKind::Alerting);
        let counts = metrics.get_snapshot().await;
        assert!(counts.tick_count >= 2);
        assert_eq!(counts.alert_count, 1);
        assert_eq!(sink.alert_count(), 2);

        let (reply, outcome) = oneshot::channel();
        commands
            .send(ControlMessage {
                command: MonitorCommand::UpdateSettings(MonitorSettings {
                    interval_ms: 5_000,
                    ..settings()
                }),
                reply: Some(reply),
            })
            .await
            .unwrap();
        assert_eq!(outcome.await.unwrap(), Ok(CommandOutcome::SettingsUpdated));

        let before = metrics.get_snapshot().await.tick_count;
        tokio::time::sleep(std::time::Duration::from_millis(12_000)).await;
        let ticked = metrics.get_snapshot().await.tick_count - before;
        // the new ticker fires at once, then every 5s: far fewer than at 1s
        assert!((2..=3).contains(&ticked), "{ticked} ticks in 12s");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.config().settings.interval_ms, 5_000);
    }

    #[tokio::test]
    async fn loop_persists_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::open(dir.path().join("config.json")));
        let (monitor, _, _) = monitor_with(vec![], vec![region("kept", [0, 0, 5, 5])]);

        let (_tx, rx) = mpsc::channel(4);
        let (snap_tx, _snap_rx) = watch::channel(MonitorSnapshot::empty());
        let cancel = CancellationToken::new();
        cancel.cancel();

        monitor_loop(monitor, store.clone(), rx, snap_tx, MetricsCollector::new(), cancel).await;

        let saved = SettingsStore::open(store.path().to_path_buf()).config();
        assert_eq!(saved.regions.len(), 1);
        assert_eq!(saved.regions[0].name, "kept");
    }
}
