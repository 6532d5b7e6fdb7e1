//! 设备开关状态轮询：游标、时间源与轮询循环。

pub mod clock;
pub mod cursor;
pub mod polling;

pub use clock::{Clock, SystemClock};
pub use cursor::PollCursor;
pub use polling::{DeviceOutcome, PollingLoop, TickReport};

/// 轮询循环构造错误。
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid monitor config: {0}")]
    InvalidConfig(String),
}
