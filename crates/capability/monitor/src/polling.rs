//! 轮询循环：逐个设备拉取状态，只在开关状态变化时持久化。
//!
//! 单设备流程：
//! 1. 首次遇到设备时从存储加载游标
//! 2. 拉取快照与开关状态；失败则本轮跳过该设备（不动游标、不写库）
//! 3. 状态未知不写库；与游标一致不写库
//! 4. 不一致时调用 `record_transition_if_new`；写入或"已是最新"都前移游标，
//!    失败则保持游标，下一轮自然重试
//!
//! 设备之间串行执行，一个设备的错误只影响它自己。

use crate::MonitorError;
use crate::clock::Clock;
use crate::cursor::PollCursor;
use std::sync::Arc;
use std::time::Duration;
use switchlog_cloud::StatusSource;
use switchlog_storage::{StatusRecord, StatusStore, TransitionWrite};
use switchlog_telemetry::{
    new_tick_id, record_already_current, record_fetch_failure, record_persist_failure,
    record_poll, record_transition_written, record_unknown_state,
};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};

/// 单设备单轮的处理结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// 游标加载失败，下一轮重试。
    CursorLoadFailed,
    FetchFailed,
    StateUnknown,
    Unchanged,
    Written(StatusRecord),
    AlreadyCurrent,
    PersistFailed,
}

/// 一轮轮询的结果。
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub outcomes: Vec<(String, DeviceOutcome)>,
    /// 收到停机信号，本轮未轮询完全部设备。
    pub interrupted: bool,
}

impl TickReport {
    pub fn written(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DeviceOutcome::Written(_)))
            .count()
    }

    pub fn outcome(&self, device_id: &str) -> Option<&DeviceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, outcome)| outcome)
    }
}

/// 轮询循环。
pub struct PollingLoop {
    source: Arc<dyn StatusSource>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    device_ids: Vec<String>,
    interval: Duration,
    cursor: PollCursor,
    ticks: u64,
}

impl PollingLoop {
    pub fn new(
        source: Arc<dyn StatusSource>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        device_ids: Vec<String>,
        interval: Duration,
    ) -> Result<Self, MonitorError> {
        if device_ids.is_empty() {
            return Err(MonitorError::InvalidConfig(
                "at least one device id is required".to_string(),
            ));
        }
        if device_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(MonitorError::InvalidConfig("blank device id".to_string()));
        }
        if interval.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            source,
            store,
            clock,
            device_ids,
            interval,
            cursor: PollCursor::new(),
            ticks: 0,
        })
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    /// 已完成的轮次。
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// 轮询全部设备一次。
    pub async fn tick(&mut self) -> TickReport {
        self.tick_with(None).await
    }

    async fn tick_with(&mut self, shutdown: Option<&watch::Receiver<bool>>) -> TickReport {
        let mut report = TickReport::default();
        let device_ids = self.device_ids.clone();
        for device_id in device_ids {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                report.interrupted = true;
                break;
            }
            let outcome = self.poll_device(&device_id).await;
            report.outcomes.push((device_id, outcome));
        }
        self.ticks += 1;
        report
    }

    /// 处理单个设备一次。
    pub async fn poll_device(&mut self, device_id: &str) -> DeviceOutcome {
        record_poll();

        if !self.cursor.is_loaded(device_id) {
            match self.store.get_last_status(device_id).await {
                Ok(last) => {
                    let stored = last.map(|record| record.switch_state);
                    self.cursor.initialize(device_id, stored);
                    debug!(
                        target: "switchlog.monitor",
                        device_id = %device_id,
                        stored = ?stored,
                        "cursor_loaded"
                    );
                }
                Err(err) => {
                    warn!(
                        target: "switchlog.monitor",
                        device_id = %device_id,
                        error = %err,
                        "cursor_load_failed"
                    );
                    return DeviceOutcome::CursorLoadFailed;
                }
            }
        }

        let (snapshot, state) = match self.source.fetch_status(device_id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                record_fetch_failure();
                warn!(
                    target: "switchlog.monitor",
                    device_id = %device_id,
                    transient = err.is_transient(),
                    error = %err,
                    "fetch_failed"
                );
                return DeviceOutcome::FetchFailed;
            }
        };
        let timestamp = self.clock.now_unix_seconds();

        let Some(current) = state.as_bool() else {
            record_unknown_state();
            warn!(
                target: "switchlog.monitor",
                device_id = %device_id,
                "switch_state_unknown"
            );
            return DeviceOutcome::StateUnknown;
        };

        let previous = self.cursor.value(device_id);
        if previous == Some(current) {
            debug!(
                target: "switchlog.monitor",
                device_id = %device_id,
                state = state.label(),
                "state_unchanged"
            );
            return DeviceOutcome::Unchanged;
        }

        info!(
            target: "switchlog.monitor",
            device_id = %device_id,
            previous = ?previous,
            current,
            timestamp,
            "state_change_detected"
        );
        match self
            .store
            .record_transition_if_new(device_id, current, &snapshot, timestamp)
            .await
        {
            Ok(TransitionWrite::Written(record)) => {
                self.cursor.set(device_id, current);
                record_transition_written();
                info!(
                    target: "switchlog.monitor",
                    device_id = %device_id,
                    timestamp = record.timestamp,
                    state = state.label(),
                    "transition_written"
                );
                DeviceOutcome::Written(record)
            }
            Ok(TransitionWrite::AlreadyCurrent) => {
                self.cursor.set(device_id, current);
                record_already_current();
                info!(
                    target: "switchlog.monitor",
                    device_id = %device_id,
                    state = state.label(),
                    "transition_already_current"
                );
                DeviceOutcome::AlreadyCurrent
            }
            Err(err) => {
                record_persist_failure();
                warn!(
                    target: "switchlog.monitor",
                    device_id = %device_id,
                    error = %err,
                    "persist_failed"
                );
                DeviceOutcome::PersistFailed
            }
        }
    }

    /// 按固定间隔轮询，直到停机信号为 true 或发送端被丢弃。
    ///
    /// 停机只在设备之间和间隔等待中生效，正在处理的设备总会走完。
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target: "switchlog.monitor",
            devices = self.device_ids.len(),
            interval_ms = self.interval.as_millis() as u64,
            "monitor_started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let tick_id = new_tick_id();
            let span = info_span!("tick", tick_id = %tick_id, tick = self.ticks + 1);
            let report = self.tick_with(Some(&shutdown)).instrument(span).await;
            debug!(
                target: "switchlog.monitor",
                devices = report.outcomes.len(),
                written = report.written(),
                "tick_done"
            );
            if report.interrupted {
                break;
            }
            if wait_or_shutdown(self.interval, &mut shutdown).await {
                break;
            }
        }
        info!(target: "switchlog.monitor", ticks = self.ticks, "monitor_stopped");
    }
}

/// 等待一个间隔；期间收到停机信号返回 true。
async fn wait_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}
