//! 请求签名（HMAC-SHA256）。
//!
//! 签名算法需与云平台逐位一致：
//!
//! ```text
//! stringToSign = METHOD \n hex(sha256(body)) \n headerLines \n path?query
//! signBase     = accessId + accessToken + t + nonce + stringToSign
//! sign         = UPPER(hex(HMAC_SHA256(accessSecret, signBase)))
//! ```
//!
//! token 获取/刷新请求的 accessToken 为空串。

use crate::error::CloudError;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// `sign_method` 请求头取值。
pub const SIGN_METHOD: &str = "HMAC-SHA256";

const NONCE_LEN: usize = 8;
const NONCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
// 62 * 4，超出部分丢弃以避免取模偏差。
const NONCE_ACCEPT_BELOW: u8 = 248;

/// 签名输入。
#[derive(Debug, Clone, Copy)]
pub struct SignInput<'a> {
    pub method: &'a str,
    /// 已拼好查询串的路径，例如 `/v1.0/token?grant_type=1`。
    pub path: &'a str,
    /// 请求体 JSON 原文；无请求体时为 None（按空串计算摘要）。
    pub body: Option<&'a str>,
    /// 参与签名的附加请求头，BTreeMap 保证按 key 字典序。
    pub extra_headers: &'a BTreeMap<String, String>,
    pub access_token: &'a str,
    pub nonce: &'a str,
    pub timestamp_ms: i64,
    pub access_id: &'a str,
    pub access_secret: &'a str,
}

/// 计算请求签名（纯函数，相同输入得到相同输出）。
pub fn sign(input: &SignInput<'_>) -> Result<String, CloudError> {
    let header_lines = canonical_headers(input.extra_headers)?;
    let body_hash = hex::encode(Sha256::digest(input.body.unwrap_or("").as_bytes()));
    let string_to_sign = format!("{}\n{body_hash}\n{header_lines}\n{}", input.method, input.path);
    let sign_base = format!(
        "{}{}{}{}{}",
        input.access_id, input.access_token, input.timestamp_ms, input.nonce, string_to_sign
    );
    let mut mac = HmacSha256::new_from_slice(input.access_secret.as_bytes())
        .map_err(|err| CloudError::SignatureInput(err.to_string()))?;
    mac.update(sign_base.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

fn canonical_headers(headers: &BTreeMap<String, String>) -> Result<String, CloudError> {
    let mut lines = Vec::with_capacity(headers.len());
    for (key, value) in headers {
        if key.is_empty() || key.contains(':') || key.contains('\n') {
            return Err(CloudError::SignatureInput(format!("invalid header name: {key:?}")));
        }
        if value.contains('\n') {
            return Err(CloudError::SignatureInput(format!("invalid header value for {key}")));
        }
        lines.push(format!("{key}:{value}"));
    }
    Ok(lines.join("\n"))
}

/// 生成 8 位字母数字 nonce。
pub fn new_nonce() -> String {
    let mut nonce = String::with_capacity(NONCE_LEN);
    let mut buf = [0u8; 16];
    while nonce.len() < NONCE_LEN {
        OsRng.fill_bytes(&mut buf);
        for byte in buf {
            if byte >= NONCE_ACCEPT_BELOW {
                continue;
            }
            let index = (byte as usize) % NONCE_ALPHABET.len();
            nonce.push(NONCE_ALPHABET[index] as char);
            if nonce.len() == NONCE_LEN {
                break;
            }
        }
    }
    nonce
}

/// 当前时间戳（毫秒）。
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
