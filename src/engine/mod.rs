pub mod state;
pub mod timers;

pub use state::{AlertState, AlertTracker, AlertTransition};
pub use timers::{
    pause_status, saturating_minutes, saturating_seconds, MuteTimer, ReminderTracker,
};
