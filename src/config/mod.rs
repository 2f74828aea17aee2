//! 配置管理模块
//!
//! 提供引擎自身设置的解析与验证

pub mod loader;
pub mod types;

// 重新导出主要类型
pub use loader::{ConfigLoader, TomlConfigLoader};
pub use types::{validate_config, LoggingSettings, SyncConfig, WatcherSettings};
