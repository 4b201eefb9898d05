pub mod monitor;
pub mod region;

pub use monitor::{GlobalMonitorState, MonitorSnapshot, RegionStatus};
pub use region::{InvalidRect, Rect, Region, RegionId, RegionStatusKind};
