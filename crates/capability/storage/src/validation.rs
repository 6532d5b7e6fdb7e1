//! 验证辅助函数
//!
//! - ensure_device_id：设备 ID 非空
//! - ensure_snapshot_matches：快照属于目标设备
//! - ensure_monotonic：同一设备的时间戳不回退

use crate::error::StorageError;
use crate::models::StatusRecord;
use domain::DeviceSnapshot;

/// 验证设备 ID 非空
pub fn ensure_device_id(device_id: &str) -> Result<(), StorageError> {
    if device_id.trim().is_empty() {
        return Err(StorageError::new("device_id required"));
    }
    Ok(())
}

/// 验证快照与目标设备一致
pub fn ensure_snapshot_matches(
    device_id: &str,
    snapshot: &DeviceSnapshot,
) -> Result<(), StorageError> {
    ensure_device_id(device_id)?;
    if snapshot.device_id != device_id {
        return Err(StorageError::new("snapshot device mismatch"));
    }
    Ok(())
}

/// 验证候选时间戳不早于最新记录（相等允许）。
pub fn ensure_monotonic(last: Option<&StatusRecord>, timestamp: i64) -> Result<(), StorageError> {
    if let Some(last) = last {
        if timestamp < last.timestamp {
            return Err(StorageError::new(format!(
                "timestamp {timestamp} precedes last record {} for device {}",
                last.timestamp, last.device_id
            )));
        }
    }
    Ok(())
}
