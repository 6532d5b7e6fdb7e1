//! # switchlog Storage 模块
//!
//! 设备元数据与开关状态变化的持久化抽象层。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：`StatusStore` 异步 Trait
//! 2. **数据模型层** (`models.rs`)：`StatusRecord`、`TransitionWrite`
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **验证辅助层** (`validation.rs`)：设备 ID、快照归属、时间戳单调
//! 5. **连接管理层** (`connection.rs`)：数据库连接池管理
//! 6. **实现层**：
//!    - `in_memory/`：内存存储实现（用于测试和演示）
//!    - `postgres/`：PostgreSQL 存储实现（生产环境使用）
//!
//! ## 核心约束
//!
//! - `device_status` 只追加，且只记录状态变化，不记录每次轮询
//! - 同一设备的时间戳非递减；早于最新记录的写入返回 `StorageError`
//! - `record_transition_if_new` 在写入前重读最新状态，重复调用只写一行
//! - 设备 upsert 与状态追加要么都成功，要么都回滚
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use switchlog_storage::{InMemoryStatusStore, StatusStore, TransitionWrite};
//! use domain::DeviceSnapshot;
//!
//! let store = InMemoryStatusStore::new();
//! let snapshot = DeviceSnapshot::bare("dev1");
//! let outcome = store
//!     .record_transition_if_new("dev1", true, &snapshot, 1000)
//!     .await?;
//! assert!(outcome.is_written());
//! ```

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod traits;
pub mod validation;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use traits::*;
pub use validation::*;

pub use in_memory::InMemoryStatusStore;
pub use postgres::PgStatusStore;
