//! 内存存储实现模块
//!
//! 用于测试和本地演示。
//!
//! 包含以下实现：
//! - StatusStore: InMemoryStatusStore

pub mod status;

pub use status::*;
