use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickMetrics {
    pub timestamp: DateTime<Utc>,
    pub capture_ms: u64,
    pub compare_ms: u64,
    pub total_ms: u64,
    pub regions_compared: usize,
    pub alerts_fired: usize,
    pub capture_failed: bool,
    pub reminder_played: bool,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_ticks: Vec<TickMetrics>,
    pub tick_count: u64,
    pub alert_count: u64,
    pub capture_failure_count: u64,
}
