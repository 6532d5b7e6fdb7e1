//! 进程运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_endpoint: String,
    pub access_id: String,
    pub access_secret: String,
    pub database_url: String,
    pub device_ids: Vec<String>,
    pub poll_interval_seconds: u64,
    pub switch_code: String,
    pub http_timeout_seconds: u64,
    pub token_refresh_skew_seconds: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_endpoint = read_required("SWITCHLOG_API_ENDPOINT")?
            .trim_end_matches('/')
            .to_string();
        let access_id = read_required("SWITCHLOG_ACCESS_ID")?;
        let access_secret = read_required("SWITCHLOG_ACCESS_SECRET")?;
        let database_url = read_required("SWITCHLOG_DATABASE_URL")?;
        let device_ids = parse_device_ids(&read_required("SWITCHLOG_DEVICE_IDS")?);
        if device_ids.is_empty() {
            return Err(ConfigError::Invalid(
                "SWITCHLOG_DEVICE_IDS".to_string(),
                "no device id".to_string(),
            ));
        }
        let poll_interval_seconds = read_u64_with_default("SWITCHLOG_POLL_INTERVAL_SECONDS", 5)?;
        if poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "SWITCHLOG_POLL_INTERVAL_SECONDS".to_string(),
                "0".to_string(),
            ));
        }
        let switch_code =
            read_optional("SWITCHLOG_SWITCH_CODE").unwrap_or_else(|| "switch_1".to_string());
        let http_timeout_seconds = read_u64_with_default("SWITCHLOG_HTTP_TIMEOUT_SECONDS", 10)?;
        let token_refresh_skew_seconds =
            read_u64_with_default("SWITCHLOG_TOKEN_REFRESH_SKEW_SECONDS", 60)?;

        Ok(Self {
            api_endpoint,
            access_id,
            access_secret,
            database_url,
            device_ids,
            poll_interval_seconds,
            switch_code,
            http_timeout_seconds,
            token_refresh_skew_seconds,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

/// 解析逗号分隔的设备 ID 列表（去空白、去空项、保序去重）。
pub fn parse_device_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn read_required(key: &str) -> Result<String, ConfigError> {
    read_optional(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
