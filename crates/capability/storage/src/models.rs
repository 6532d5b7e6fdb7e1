//! 数据模型
//!
//! - 状态记录：StatusRecord（`device_status` 表的一行）
//! - 复合写入结果：TransitionWrite
//!
//! 设备行直接复用 `domain::DeviceSnapshot`。

/// 一次已记录的开关状态变化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub device_id: String,
    /// unix 秒。
    pub timestamp: i64,
    pub switch_state: bool,
}

impl StatusRecord {
    pub fn new(device_id: impl Into<String>, timestamp: i64, switch_state: bool) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            switch_state,
        }
    }
}

/// `record_transition_if_new` 的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWrite {
    /// 设备行已 upsert，新状态行已追加。
    Written(StatusRecord),
    /// 库中最新状态已等于候选状态，未写入。
    AlreadyCurrent,
}

impl TransitionWrite {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}
