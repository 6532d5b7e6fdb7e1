//! 签名请求客户端。
//!
//! 每次请求：确保持有有效 token → 计算签名头 → 发送。
//! 收到 401 时走一次刷新（refresh token 失败则退回完整获取），
//! 然后用新 token 重试原请求且只重试一次；重试仍 401 则返回 `CloudError::Auth`。

use crate::error::CloudError;
use crate::sign::{SIGN_METHOD, SignInput, new_nonce, now_millis, sign};
use crate::token::{TokenPhase, TokenState, TokenStore};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use switchlog_telemetry::{record_token_acquisition, record_token_refresh};
use tracing::{debug, info, warn};

const TOKEN_PATH: &str = "/v1.0/token";
const GRANT_PATH: &str = "/v1.0/token?grant_type=1";

/// 云平台凭据（进程生命周期内不可变）。
#[derive(Clone)]
pub struct Credentials {
    pub access_id: String,
    pub access_secret: String,
    /// 不带结尾 `/` 的 API 根地址。
    pub endpoint: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("access_secret", &"***")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// 客户端参数。
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub timeout: Duration,
    /// 距过期不足该秒数的 token 在使用前先刷新。
    pub refresh_skew_seconds: i64,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            refresh_skew_seconds: 60,
        }
    }
}

/// 一次 API 调用的描述。
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// 可含 `{name}` 占位符的路径模板。
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// 替换路径占位符并追加按 key 排序的查询串（空查询不追加 `?`）。
    pub fn resolved_path(&self) -> String {
        let mut path = self.path.clone();
        for (key, value) in &self.params {
            path = path.replace(&format!("{{{key}}}"), value);
        }
        if self.query.is_empty() {
            return path;
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{path}?{query}")
    }
}

/// 设备状态项（`{code, value}`）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusItem {
    pub code: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// 设备指令。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCommand {
    pub code: String,
    pub value: serde_json::Value,
}

impl DeviceCommand {
    pub fn new(code: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            code: code.into(),
            value,
        }
    }
}

/// 平台响应信封。
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    /// 有效期（秒）。
    #[serde(default)]
    expire_time: Option<i64>,
}

struct RawResponse {
    status: StatusCode,
    body: String,
}

/// 签名请求客户端（持有凭据与 token 存储）。
pub struct ApiClient {
    http: reqwest::Client,
    credentials: Credentials,
    tokens: TokenStore,
    config: ApiClientConfig,
}

impl ApiClient {
    pub fn new(credentials: Credentials) -> Result<Self, CloudError> {
        Self::with_config(credentials, ApiClientConfig::default())
    }

    pub fn with_config(
        mut credentials: Credentials,
        config: ApiClientConfig,
    ) -> Result<Self, CloudError> {
        if credentials.access_id.is_empty() || credentials.access_secret.is_empty() {
            return Err(CloudError::Auth("missing access id or secret".to_string()));
        }
        credentials.endpoint = credentials.endpoint.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| CloudError::Network(err.to_string()))?;
        Ok(Self {
            http,
            credentials,
            tokens: TokenStore::new(),
            config,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// 发送签名请求并返回响应 JSON。
    pub async fn send(&self, request: ApiRequest) -> Result<serde_json::Value, CloudError> {
        let path = request.resolved_path();
        let body = request
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| CloudError::SignatureInput(err.to_string()))?;

        let token = self.valid_access_token().await?;
        let response = self
            .execute(&request.method, &path, body.as_deref(), &token)
            .await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return into_json(response);
        }

        warn!(
            target: "switchlog.cloud",
            method = %request.method,
            path = %path,
            "request_unauthorized"
        );
        let token = self.refresh_after_unauthorized(&token).await?;
        let response = self
            .execute(&request.method, &path, body.as_deref(), &token)
            .await?;
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(CloudError::Auth(format!(
                "{} {} still unauthorized after token refresh",
                request.method, path
            )));
        }
        into_json(response)
    }

    /// `GET /v1.0/devices/{device_id}`，返回 `result` 部分。
    pub async fn device_info(&self, device_id: &str) -> Result<serde_json::Value, CloudError> {
        let response = self
            .send(ApiRequest::get("/v1.0/devices/{device_id}").param("device_id", device_id))
            .await?;
        unwrap_result(response)
    }

    /// `GET /v1.0/devices/{device_id}/status`。
    pub async fn device_status(&self, device_id: &str) -> Result<Vec<StatusItem>, CloudError> {
        let response = self
            .send(
                ApiRequest::get("/v1.0/devices/{device_id}/status").param("device_id", device_id),
            )
            .await?;
        let result = unwrap_result(response)?;
        serde_json::from_value(result).map_err(|err| CloudError::Decode(err.to_string()))
    }

    /// `POST /v1.0/devices/{device_id}/commands`。
    pub async fn send_commands(
        &self,
        device_id: &str,
        commands: &[DeviceCommand],
    ) -> Result<serde_json::Value, CloudError> {
        let body = serde_json::json!({ "commands": commands });
        let response = self
            .send(
                ApiRequest::post("/v1.0/devices/{device_id}/commands")
                    .param("device_id", device_id)
                    .body(body),
            )
            .await?;
        unwrap_result(response)
    }

    async fn valid_access_token(&self) -> Result<String, CloudError> {
        let state = self.tokens.get().await;
        if self.is_usable(&state) {
            return Ok(state.access_token);
        }

        let _gate = self.tokens.lock_refresh().await;
        // 等待期间可能已有其他调用完成获取。
        let state = self.tokens.get().await;
        if self.is_usable(&state) {
            return Ok(state.access_token);
        }
        if state.is_empty() {
            self.acquire().await
        } else {
            self.refresh(state).await
        }
    }

    async fn refresh_after_unauthorized(&self, stale_token: &str) -> Result<String, CloudError> {
        let _gate = self.tokens.lock_refresh().await;
        let state = self.tokens.get().await;
        if !state.is_empty() && state.access_token != stale_token {
            debug!(target: "switchlog.cloud", "token_already_refreshed");
            return Ok(state.access_token);
        }
        self.refresh(state).await
    }

    /// 调用方必须持有刷新互斥门。
    async fn refresh(&self, state: TokenState) -> Result<String, CloudError> {
        if !state.refresh_token.is_empty() {
            self.tokens.mark(TokenPhase::Refreshing).await;
            record_token_refresh();
            let path = format!("{}/{}", TOKEN_PATH, state.refresh_token);
            match self.request_token(&path).await {
                Ok(next) => {
                    let token = next.access_token.clone();
                    self.tokens.set(next).await;
                    info!(target: "switchlog.cloud", "token_refreshed");
                    return Ok(token);
                }
                Err(err) => {
                    warn!(
                        target: "switchlog.cloud",
                        error = %err,
                        "token_refresh_failed_reacquiring"
                    );
                }
            }
        }
        self.tokens.clear().await;
        self.acquire().await
    }

    /// 调用方必须持有刷新互斥门。
    async fn acquire(&self) -> Result<String, CloudError> {
        self.tokens.mark(TokenPhase::Acquiring).await;
        record_token_acquisition();
        match self.request_token(GRANT_PATH).await {
            Ok(next) => {
                let token = next.access_token.clone();
                self.tokens.set(next).await;
                info!(target: "switchlog.cloud", "token_acquired");
                Ok(token)
            }
            Err(err) => {
                self.tokens.clear().await;
                warn!(target: "switchlog.cloud", error = %err, "token_acquire_failed");
                Err(CloudError::Auth(format!("token acquisition failed: {err}")))
            }
        }
    }

    async fn request_token(&self, path: &str) -> Result<TokenState, CloudError> {
        let response = self.execute(&Method::GET, path, None, "").await?;
        let result = unwrap_result(into_json(response)?)?;
        let grant: TokenGrant =
            serde_json::from_value(result).map_err(|err| CloudError::Decode(err.to_string()))?;
        if grant.access_token.is_empty() || grant.refresh_token.is_empty() {
            return Err(CloudError::Auth("empty token in grant".to_string()));
        }
        Ok(TokenState {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expire_time.map(|ttl| now_millis() / 1000 + ttl),
        })
    }

    fn is_usable(&self, state: &TokenState) -> bool {
        let now_seconds = now_millis() / 1000;
        !state.is_empty() && !state.is_expired(now_seconds, self.config.refresh_skew_seconds)
    }

    async fn execute(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
        access_token: &str,
    ) -> Result<RawResponse, CloudError> {
        let headers = self.signed_headers(method, path, body, access_token)?;
        let url = format!("{}{}", self.credentials.endpoint, path);
        debug!(target: "switchlog.cloud", method = %method, path = %path, "request_send");

        let mut builder = self.http.request(method.clone(), url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            target: "switchlog.cloud",
            method = %method,
            path = %path,
            status = status.as_u16(),
            "request_done"
        );
        Ok(RawResponse { status, body })
    }

    fn signed_headers(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
        access_token: &str,
    ) -> Result<Vec<(&'static str, String)>, CloudError> {
        let nonce = new_nonce();
        let timestamp_ms = now_millis();
        let extra_headers = BTreeMap::new();
        let signature = sign(&SignInput {
            method: method.as_str(),
            path,
            body,
            extra_headers: &extra_headers,
            access_token,
            nonce: &nonce,
            timestamp_ms,
            access_id: &self.credentials.access_id,
            access_secret: &self.credentials.access_secret,
        })?;
        let mut headers = vec![
            ("client_id", self.credentials.access_id.clone()),
            ("sign_method", SIGN_METHOD.to_string()),
            ("t", timestamp_ms.to_string()),
            ("nonce", nonce),
            ("sign", signature),
        ];
        if !access_token.is_empty() {
            headers.push(("access_token", access_token.to_string()));
        }
        Ok(headers)
    }
}

fn into_json(response: RawResponse) -> Result<serde_json::Value, CloudError> {
    if !response.status.is_success() {
        return Err(CloudError::Http {
            status: response.status.as_u16(),
            body: response.body,
        });
    }
    if response.body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|err| CloudError::Decode(err.to_string()))
}

/// 解开平台信封：`success=true` 返回 `result`，否则返回 `CloudError::Api`。
pub fn unwrap_result(value: serde_json::Value) -> Result<serde_json::Value, CloudError> {
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|err| CloudError::Decode(err.to_string()))?;
    if !envelope.success {
        return Err(CloudError::Api {
            code: envelope.code.unwrap_or(-1),
            msg: envelope.msg.unwrap_or_default(),
        });
    }
    Ok(envelope.result.unwrap_or(serde_json::Value::Null))
}
