mod types;

pub use types::{MetricsSnapshot, SystemMetrics, TickMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_TICKS: usize = 20;

/// Per-tick timings plus this process's CPU and memory.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_ticks: VecDeque<TickMetrics>,
    tick_count: u64,
    alert_count: u64,
    capture_failure_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsState {
    fn refresh(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes, so prime it once.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_ticks: VecDeque::with_capacity(MAX_RECENT_TICKS),
                tick_count: 0,
                alert_count: 0,
                capture_failure_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        self.inner.lock().await.refresh()
    }

    pub async fn record_tick(&self, metrics: TickMetrics) {
        let mut state = self.inner.lock().await;

        state.tick_count += 1;
        state.alert_count += metrics.alerts_fired as u64;
        if metrics.capture_failed {
            state.capture_failure_count += 1;
        }

        if state.recent_ticks.len() == MAX_RECENT_TICKS {
            state.recent_ticks.pop_front();
        }
        state.recent_ticks.push_back(metrics);
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.refresh();

        MetricsSnapshot {
            system,
            recent_ticks: state.recent_ticks.iter().cloned().collect(),
            tick_count: state.tick_count,
            alert_count: state.alert_count,
            capture_failure_count: state.capture_failure_count,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
