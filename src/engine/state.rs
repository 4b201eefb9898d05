use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AlertState {
    #[default]
    Normal,
    Alerting,
}

/// What a single observation did to a region's alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    /// New alert; sinks should be dispatched.
    Fired,
    /// Still different inside the dwell window; no dispatch.
    Sustained,
    /// Content settled but the alert has not been shown long enough.
    Lingering,
    /// Back to `Normal`.
    Cleared,
    /// Normal and unchanged.
    Quiet,
}

impl AlertTransition {
    pub fn should_dispatch(self) -> bool {
        matches!(self, AlertTransition::Fired)
    }
}

/// Normal/Alerting state of one region plus the time it last fired.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertTracker {
    pub state: AlertState,
    pub last_alert_time: Option<DateTime<Utc>>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alerting(&self) -> bool {
        self.state == AlertState::Alerting
    }

    /// Time since the last alert fired; `None` if it never did.
    fn since_last_alert(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_alert_time.map(|t| now - t)
    }

    /// Feeds one comparison outcome through the state machine.
    ///
    /// A difference fires when the region is not alerting, or when the
    /// current alert is older than `display` (strictly). A settled region
    /// clears once the alert has been up for at least `display`.
    pub fn observe(
        self,
        is_different: bool,
        now: DateTime<Utc>,
        display: TimeDelta,
    ) -> (Self, AlertTransition) {
        let since = self.since_last_alert(now);

        if is_different {
            let expired = since.map_or(true, |elapsed| elapsed > display);
            if !self.is_alerting() || expired {
                let next = Self {
                    state: AlertState::Alerting,
                    last_alert_time: Some(now),
                };
                return (next, AlertTransition::Fired);
            }
            let next = Self {
                state: AlertState::Alerting,
                ..self
            };
            return (next, AlertTransition::Sustained);
        }

        if !self.is_alerting() {
            return (self, AlertTransition::Quiet);
        }

        let dwelled = since.map_or(true, |elapsed| elapsed >= display);
        if dwelled {
            let next = Self {
                state: AlertState::Normal,
                ..self
            };
            (next, AlertTransition::Cleared)
        } else {
            (self, AlertTransition::Lingering)
        }
    }
}
