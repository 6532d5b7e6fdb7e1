//! 存储接口 Trait 定义
//!
//! - StatusStore：设备元数据与开关状态变化的持久化
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发（轮询循环持有 `Arc<dyn StatusStore>`）

use crate::error::StorageError;
use crate::models::{StatusRecord, TransitionWrite};
use async_trait::async_trait;
use domain::DeviceSnapshot;

/// 状态存储接口
///
/// 同一设备的写入必须串行；复合操作 `record_transition_if_new`
/// 要么 upsert 设备并追加状态行全部成功，要么全部回滚。
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// 读取设备最近一条状态记录（按时间戳倒序）。
    async fn get_last_status(&self, device_id: &str)
    -> Result<Option<StatusRecord>, StorageError>;

    /// 按 device_id 幂等插入或更新设备元数据。
    async fn upsert_device(&self, snapshot: &DeviceSnapshot) -> Result<(), StorageError>;

    /// 追加一条状态记录（设备行必须已存在）。
    async fn append_transition(
        &self,
        device_id: &str,
        timestamp: i64,
        switch_state: bool,
    ) -> Result<StatusRecord, StorageError>;

    /// 复合写入：重读最新状态，与候选一致则返回 `AlreadyCurrent`，
    /// 否则在同一原子单元内 upsert 设备并追加状态行。
    async fn record_transition_if_new(
        &self,
        device_id: &str,
        candidate: bool,
        snapshot: &DeviceSnapshot,
        timestamp: i64,
    ) -> Result<TransitionWrite, StorageError>;

    /// 读取已存储的设备元数据。
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceSnapshot>, StorageError>;

    /// 最近 `limit` 条状态记录，新的在前。
    async fn list_recent(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StatusRecord>, StorageError>;

    /// `[from, to]` 闭区间内的状态记录，按时间升序。
    async fn list_between(
        &self,
        device_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusRecord>, StorageError>;
}
