pub mod capture;
pub mod commands;
pub mod controller;
pub mod loop_worker;

pub use capture::{CaptureSource, Frame};
#[cfg(feature = "screen-capture")]
pub use capture::ScreenCapture;
pub use commands::{CommandError, CommandOutcome, MonitorCommand};
pub use controller::MonitorController;
pub use loop_worker::{Monitor, TickReport};
