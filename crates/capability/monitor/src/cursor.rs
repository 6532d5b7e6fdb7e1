//! 每个设备最近一次已确认持久化的开关状态。

use std::collections::HashMap;

/// 轮询游标。
///
/// - 无键：尚未从存储加载（UNKNOWN）
/// - `Some(None)`：已加载，库中没有记录
/// - `Some(Some(v))`：已知状态
///
/// 只有写入成功或复查确认库中已是该值时才前移，不跟随每次拉取。
#[derive(Debug, Default, Clone)]
pub struct PollCursor {
    states: HashMap<String, Option<bool>>,
}

impl PollCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<Option<bool>> {
        self.states.get(device_id).copied()
    }

    /// 已知状态（未加载或库中无记录均为 None）。
    pub fn value(&self, device_id: &str) -> Option<bool> {
        self.get(device_id).flatten()
    }

    pub fn is_loaded(&self, device_id: &str) -> bool {
        self.states.contains_key(device_id)
    }

    /// 用存储中的最新记录初始化。
    pub fn initialize(&mut self, device_id: &str, stored: Option<bool>) {
        self.states.insert(device_id.to_string(), stored);
    }

    pub fn set(&mut self, device_id: &str, state: bool) {
        self.states.insert(device_id.to_string(), Some(state));
    }
}
