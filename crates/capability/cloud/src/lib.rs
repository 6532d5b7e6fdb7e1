//! 云平台接入能力：HMAC 请求签名、token 生命周期、签名请求客户端与设备状态源。
//!
//! 调用链：`DeviceStatusSource` → `ApiClient` → `sign`。
//! `ApiClient` 独占 `Credentials` 与 `TokenStore`，由进程入口构造一次后以 `Arc` 共享。

mod client;
mod device;
mod error;
mod sign;
mod token;

pub use client::{
    ApiClient, ApiClientConfig, ApiRequest, Credentials, DeviceCommand, StatusItem, unwrap_result,
};
pub use device::{DeviceStatusSource, StatusSource, project_switch_state, switch_state_from_value};
pub use error::CloudError;
pub use sign::{SIGN_METHOD, SignInput, new_nonce, now_millis, sign};
pub use token::{TokenPhase, TokenState, TokenStore};
