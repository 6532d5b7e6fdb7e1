//! 追踪初始化、tick ID 与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub fetch_failures: u64,
    pub unknown_states: u64,
    pub transitions_written: u64,
    pub already_current: u64,
    pub persist_failures: u64,
    pub token_acquisitions: u64,
    pub token_refreshes: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    polls: AtomicU64,
    fetch_failures: AtomicU64,
    unknown_states: AtomicU64,
    transitions_written: AtomicU64,
    already_current: AtomicU64,
    persist_failures: AtomicU64,
    token_acquisitions: AtomicU64,
    token_refreshes: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            unknown_states: AtomicU64::new(0),
            transitions_written: AtomicU64::new(0),
            already_current: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            token_acquisitions: AtomicU64::new(0),
            token_refreshes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            unknown_states: self.unknown_states.load(Ordering::Relaxed),
            transitions_written: self.transitions_written.load(Ordering::Relaxed),
            already_current: self.already_current.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            token_acquisitions: self.token_acquisitions.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 tick_id，用于关联一轮轮询内的全部日志。
pub fn new_tick_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录单设备轮询次数。
pub fn record_poll() {
    metrics().polls.fetch_add(1, Ordering::Relaxed);
}

/// 记录状态拉取失败次数。
pub fn record_fetch_failure() {
    metrics().fetch_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录云端返回未知状态的次数。
pub fn record_unknown_state() {
    metrics().unknown_states.fetch_add(1, Ordering::Relaxed);
}

/// 记录状态变化写入成功次数。
pub fn record_transition_written() {
    metrics().transitions_written.fetch_add(1, Ordering::Relaxed);
}

/// 记录写前复查发现库中已是最新的次数。
pub fn record_already_current() {
    metrics().already_current.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化失败次数。
pub fn record_persist_failure() {
    metrics().persist_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录完整 token 获取（grant_type=1）次数。
pub fn record_token_acquisition() {
    metrics().token_acquisitions.fetch_add(1, Ordering::Relaxed);
}

/// 记录 refresh token 刷新次数。
pub fn record_token_refresh() {
    metrics().token_refreshes.fetch_add(1, Ordering::Relaxed);
}
