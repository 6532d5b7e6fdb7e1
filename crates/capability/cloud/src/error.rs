/// 云平台调用错误。
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// 签名输入非法（调用方编程错误）。
    #[error("signature input error: {0}")]
    SignatureInput(String),
    /// 重新获取 token 后仍无法鉴权。
    #[error("auth error: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("http error: status {status}: {body}")]
    Http { status: u16, body: String },
    /// 平台信封 `success=false`。
    #[error("api error: code {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("decode error: {0}")]
    Decode(String),
}

impl CloudError {
    /// 是否可在下一轮轮询中重试。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http { .. } | Self::Api { .. } | Self::Decode(_)
        )
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
