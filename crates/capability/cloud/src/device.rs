//! 设备状态源：拉取设备快照并投影出关注的开关状态。

use crate::client::{ApiClient, StatusItem};
use crate::error::CloudError;
use async_trait::async_trait;
use domain::{DeviceSnapshot, SwitchState};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// 设备状态源抽象（轮询循环只依赖该 trait）。
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(
        &self,
        device_id: &str,
    ) -> Result<(DeviceSnapshot, SwitchState), CloudError>;
}

/// `GET /v1.0/devices/{id}` 的 `result` 部分。
#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    online: Option<bool>,
    #[serde(default)]
    active_time: Option<i64>,
    #[serde(default)]
    create_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    status: Vec<StatusItem>,
}

/// 基于 ApiClient 的设备状态源。
///
/// 设备信息接口同时携带元数据与 `status` 列表，一次请求即可得到快照和开关状态。
pub struct DeviceStatusSource {
    client: Arc<ApiClient>,
    switch_code: String,
}

impl DeviceStatusSource {
    pub fn new(client: Arc<ApiClient>, switch_code: impl Into<String>) -> Self {
        Self {
            client,
            switch_code: switch_code.into(),
        }
    }
}

#[async_trait]
impl StatusSource for DeviceStatusSource {
    async fn fetch_status(
        &self,
        device_id: &str,
    ) -> Result<(DeviceSnapshot, SwitchState), CloudError> {
        let result = self.client.device_info(device_id).await?;
        let info: DeviceInfo =
            serde_json::from_value(result).map_err(|err| CloudError::Decode(err.to_string()))?;
        let state = project_switch_state(&info.status, &self.switch_code);
        let snapshot = DeviceSnapshot {
            device_id: device_id.to_string(),
            name: info.name,
            category: info.category,
            online: info.online.unwrap_or(false),
            active_time: info.active_time,
            create_time: info.create_time,
            update_time: info.update_time,
            ip: info.ip,
            model: info.model,
            time_zone: info.time_zone,
        };
        Ok((snapshot, state))
    }
}

/// 将 `{code, value}` 列表投影为 code→value 映射后取出指定能力的状态。
pub fn project_switch_state(items: &[StatusItem], code: &str) -> SwitchState {
    let values: HashMap<&str, &serde_json::Value> = items
        .iter()
        .map(|item| (item.code.as_str(), &item.value))
        .collect();
    switch_state_from_value(values.get(code).copied())
}

/// 只有 JSON 布尔视为已知状态，缺失或其他表示均为 Unknown。
pub fn switch_state_from_value(value: Option<&serde_json::Value>) -> SwitchState {
    match value {
        Some(serde_json::Value::Bool(on)) => SwitchState::from_bool(*on),
        _ => SwitchState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(code: &str, value: serde_json::Value) -> StatusItem {
        StatusItem {
            code: code.to_string(),
            value,
        }
    }

    #[test]
    fn projects_tracked_code_only() {
        let items = vec![item("countdown_1", json!(0)), item("switch_1", json!(true))];
        assert_eq!(project_switch_state(&items, "switch_1"), SwitchState::On);
        assert_eq!(project_switch_state(&items, "switch_2"), SwitchState::Unknown);
    }

    #[test]
    fn non_boolean_values_are_unknown() {
        assert_eq!(switch_state_from_value(Some(&json!(false))), SwitchState::Off);
        assert_eq!(switch_state_from_value(Some(&json!("true"))), SwitchState::Unknown);
        assert_eq!(switch_state_from_value(Some(&json!(1))), SwitchState::Unknown);
        assert_eq!(switch_state_from_value(Some(&json!(null))), SwitchState::Unknown);
        assert_eq!(switch_state_from_value(None), SwitchState::Unknown);
    }
}
