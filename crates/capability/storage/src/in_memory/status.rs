//! 状态内存存储实现
//!
//! 用于测试和本地演示。设备表与状态表放在同一把锁下，
//! 复合写入在一次写锁内完成，等价于 Postgres 的事务 + 设备锁。

use crate::error::StorageError;
use crate::models::{StatusRecord, TransitionWrite};
use crate::traits::StatusStore;
use crate::validation::{ensure_device_id, ensure_monotonic, ensure_snapshot_matches};
use domain::DeviceSnapshot;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceSnapshot>,
    /// 每个设备的状态行，按追加顺序（时间戳非递减）。
    statuses: HashMap<String, Vec<StatusRecord>>,
}

impl Inner {
    fn last(&self, device_id: &str) -> Option<&StatusRecord> {
        self.statuses.get(device_id).and_then(|rows| rows.last())
    }

    fn append(
        &mut self,
        device_id: &str,
        timestamp: i64,
        switch_state: bool,
    ) -> Result<StatusRecord, StorageError> {
        if !self.devices.contains_key(device_id) {
            return Err(StorageError::new(format!(
                "device_status references unknown device {device_id}"
            )));
        }
        ensure_monotonic(self.last(device_id), timestamp)?;
        let record = StatusRecord::new(device_id, timestamp, switch_state);
        self.statuses
            .entry(device_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }
}

/// 状态内存存储
pub struct InMemoryStatusStore {
    inner: RwLock<Inner>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// 所有设备的状态行总数（测试断言用）。
    pub fn status_count(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.statuses.values().map(Vec::len).sum())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get_last_status(
        &self,
        device_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(inner.last(device_id).cloned())
    }

    async fn upsert_device(&self, snapshot: &DeviceSnapshot) -> Result<(), StorageError> {
        ensure_device_id(&snapshot.device_id)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        inner
            .devices
            .insert(snapshot.device_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn append_transition(
        &self,
        device_id: &str,
        timestamp: i64,
        switch_state: bool,
    ) -> Result<StatusRecord, StorageError> {
        ensure_device_id(device_id)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        inner.append(device_id, timestamp, switch_state)
    }

    async fn record_transition_if_new(
        &self,
        device_id: &str,
        candidate: bool,
        snapshot: &DeviceSnapshot,
        timestamp: i64,
    ) -> Result<TransitionWrite, StorageError> {
        ensure_snapshot_matches(device_id, snapshot)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let last = inner.last(device_id);
        if last.map(|record| record.switch_state) == Some(candidate) {
            return Ok(TransitionWrite::AlreadyCurrent);
        }
        // 先校验再改动，失败时不留下半截写入。
        ensure_monotonic(last, timestamp)?;
        inner
            .devices
            .insert(device_id.to_string(), snapshot.clone());
        let record = inner.append(device_id, timestamp, candidate)?;
        Ok(TransitionWrite::Written(record))
    }

    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceSnapshot>, StorageError> {
        ensure_device_id(device_id)?;
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(inner.devices.get(device_id).cloned())
    }

    async fn list_recent(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        let limit = usize::try_from(limit.max(0)).unwrap_or_default();
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let items = inner
            .statuses
            .get(device_id)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn list_between(
        &self,
        device_id: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<StatusRecord>, StorageError> {
        ensure_device_id(device_id)?;
        let inner = self
            .inner
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let items = inner
            .statuses
            .get(device_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.timestamp >= from && row.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryStatusStore;
    use crate::traits::StatusStore;
    use domain::DeviceSnapshot;

    #[tokio::test]
    async fn find_device_reports_poisoned_lock() {
        let store = InMemoryStatusStore::new();
        store
            .upsert_device(&DeviceSnapshot::bare("dev1"))
            .await
            .expect("upsert");

        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = store.inner.write().expect("write lock");
                    panic!("poison the lock");
                })
                .join();
        });

        let err = store.find_device("dev1").await.expect_err("poisoned");
        assert!(err.to_string().contains("lock failed"));
    }
}
