use std::time::{SystemTime, UNIX_EPOCH};

/// 时间源（测试中可替换为手动时钟）。
pub trait Clock: Send + Sync {
    /// 当前 unix 秒。
    fn now_unix_seconds(&self) -> i64;
}

/// 系统时钟。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }
}
