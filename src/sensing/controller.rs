use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsCollector;
use crate::models::MonitorSnapshot;
use crate::settings::SettingsStore;

use super::commands::{CommandOutcome, MonitorCommand};
use super::loop_worker::{monitor_loop, ControlMessage, Monitor};

const COMMAND_QUEUE: usize = 32;

/// Owns the monitor task: start it, talk to it, stop it.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    commands: Option<mpsc::Sender<ControlMessage>>,
    snapshot_tx: Option<watch::Sender<MonitorSnapshot>>,
    snapshot_rx: watch::Receiver<MonitorSnapshot>,
    metrics: MetricsCollector,
}

impl MonitorController {
    pub fn new() -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(MonitorSnapshot::empty());
        Self {
            handle: None,
            cancel_token: None,
            commands: None,
            snapshot_tx: Some(snapshot_tx),
            snapshot_rx,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn start(&mut self, monitor: Monitor, store: Arc<SettingsStore>) -> Result<()> {
        if self.handle.is_some() {
            bail!("monitor already active");
        }
        let snapshot_tx = self
            .snapshot_tx
            .take()
            .ok_or_else(|| anyhow!("monitor cannot be restarted"))?;

        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);

        let handle = tokio::spawn(monitor_loop(
            monitor,
            store,
            rx,
            snapshot_tx,
            self.metrics.clone(),
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.commands = Some(tx);
        Ok(())
    }

    /// Queues a command for the loop and waits for its outcome.
    pub async fn send(&self, command: MonitorCommand) -> Result<CommandOutcome> {
        let tx = self
            .commands
            .as_ref()
            .ok_or_else(|| anyhow!("monitor is not running"))?;
        let (reply, outcome) = oneshot::channel();
        tx.send(ControlMessage {
            command,
            reply: Some(reply),
        })
        .await
        .map_err(|_| anyhow!("monitor loop has stopped"))?;

        let outcome = outcome.await.context("monitor loop dropped the command")?;
        Ok(outcome?)
    }

    /// Latest snapshot; updated after every tick and command.
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.commands = None;

        if let Some(handle) = self.handle.take() {
            info!("waiting for monitor loop to finish");
            handle
                .await
                .context("monitor loop task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::tests::RecordingSink;
    use crate::models::Rect;
    use crate::sensing::capture::tests::ScriptedCapture;
    use crate::sensing::commands::CommandError;
    use crate::settings::AppConfig;

    fn monitor() -> Monitor {
        Monitor::new(
            AppConfig::default(),
            Box::new(ScriptedCapture::new([])),
            Arc::new(RecordingSink::default()),
            None,
        )
    }

    #[tokio::test]
    async fn commands_round_trip_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::open(dir.path().join("config.json")));

        let mut controller = MonitorController::new();
        let mut snapshots = controller.subscribe();
        controller.start(monitor(), store.clone()).unwrap();

        let outcome = controller
            .send(MonitorCommand::AddRegion {
                name: "minimap".into(),
                rect: Rect::new(0, 0, 32, 32).unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::RegionAdded {
                name: "minimap".into(),
                index: 0
            }
        );
        assert_eq!(store.config().regions.len(), 1);

        snapshots.changed().await.unwrap();
        assert!(snapshots
            .borrow_and_update()
            .regions
            .iter()
            .any(|r| r.name == "minimap"));

        let err = controller
            .send(MonitorCommand::ToggleMuteSound(3))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CommandError>(),
            Some(&CommandError::NoSuchRegion {
                index: 3,
                count: 1
            })
        );

        controller.stop().await.unwrap();
        assert!(controller.send(MonitorCommand::Refresh).await.is_err());
    }

    #[tokio::test]
    async fn starting_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SettingsStore::open(dir.path().join("config.json")));
        let mut controller = MonitorController::new();
        controller.start(monitor(), store.clone()).unwrap();
        assert!(controller.start(monitor(), store).is_err());
        controller.stop().await.unwrap();
    }
}
