//! access token 存储。
//!
//! 状态机：`Empty → Acquiring → Valid → (401) Refreshing → Valid | Empty`。
//! 驱动逻辑在 `ApiClient` 中，这里只负责保存状态并提供刷新互斥门：
//! 签名读取走读锁，获取/刷新必须先拿到 `lock_refresh` 返回的守卫，
//! 同一时刻只有一个刷新在途（平台侧 refresh token 一经使用即失效）。

use tokio::sync::{Mutex, MutexGuard, RwLock};

/// 当前持有的 token。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    /// access token 过期时间（unix 秒），平台未返回时为 None。
    pub expires_at: Option<i64>,
}

impl TokenState {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty()
    }

    /// 在 `skew_seconds` 提前量内视为已过期。
    pub fn is_expired(&self, now_seconds: i64, skew_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_seconds >= expires_at.saturating_sub(skew_seconds),
            None => false,
        }
    }
}

/// token 生命周期阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    Empty,
    Acquiring,
    Valid,
    Refreshing,
}

#[derive(Debug)]
struct Slot {
    state: TokenState,
    phase: TokenPhase,
}

/// token 存储（由 `ApiClient` 独占）。
#[derive(Debug)]
pub struct TokenStore {
    slot: RwLock<Slot>,
    gate: Mutex<()>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                state: TokenState::default(),
                phase: TokenPhase::Empty,
            }),
            gate: Mutex::new(()),
        }
    }

    pub async fn get(&self) -> TokenState {
        self.slot.read().await.state.clone()
    }

    pub async fn phase(&self) -> TokenPhase {
        self.slot.read().await.phase
    }

    /// 写入新 token；access token 为空时等同于 clear。
    pub async fn set(&self, state: TokenState) {
        let mut slot = self.slot.write().await;
        slot.phase = if state.is_empty() {
            TokenPhase::Empty
        } else {
            TokenPhase::Valid
        };
        slot.state = state;
    }

    /// 丢弃 access token 与 refresh token。
    pub async fn clear(&self) {
        let mut slot = self.slot.write().await;
        slot.state = TokenState::default();
        slot.phase = TokenPhase::Empty;
    }

    pub(crate) async fn mark(&self, phase: TokenPhase) {
        self.slot.write().await.phase = phase;
    }

    /// 获取刷新互斥门。
    pub(crate) async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
