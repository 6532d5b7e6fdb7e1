/// 设备开关状态（三值）。
///
/// `Unknown` 表示云端响应中没有该能力或取值不是布尔，
/// 与显式的 `Off` 区分，避免把残缺响应当成状态变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchState {
    On,
    Off,
    Unknown,
}

impl SwitchState {
    /// 由明确的布尔值构造。
    pub fn from_bool(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }

    /// 已知状态返回布尔值，未知返回 None。
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::On => Some(true),
            Self::Off => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    /// 日志展示用。
    pub fn label(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// 单次轮询得到的设备元数据快照。
///
/// 仅在检测到状态变化时随变化一起写入 `devices` 表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub device_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub online: bool,
    /// 以下时间均为 unix 秒。
    pub active_time: Option<i64>,
    pub create_time: Option<i64>,
    pub update_time: Option<i64>,
    pub ip: Option<String>,
    pub model: Option<String>,
    pub time_zone: Option<String>,
}

impl DeviceSnapshot {
    /// 只有设备 ID 的最小快照（用于测试或占位）。
    pub fn bare(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            category: None,
            online: false,
            active_time: None,
            create_time: None,
            update_time: None,
            ip: None,
            model: None,
            time_zone: None,
        }
    }
}
