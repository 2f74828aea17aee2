//! Config Sync - 运行时配置同步引擎
//!
//! 把一组命名变量（静态值或由外部配置源解析的动态值）维护为
//! `NAME=VALUE` 快照，支持：
//! - 防抖动与强制上限的刷新调度
//! - 按配置源类型管理生命周期（配置、读取、停止）
//! - 代数递增的快照发布与阻塞等待
//! - 慢消费者友好的变更通知
//! - 结构化日志记录

pub mod config;
pub mod error;
pub mod logging;
pub mod sourcer;
pub mod sync;

// 重新导出主要类型
pub use config::{SyncConfig, TomlConfigLoader};
pub use error::{ConfigSyncError, Result, SourcerError, WatchError};
pub use sourcer::{ConfigSourcer, Configurable, MemorySourcer};
pub use sync::{
    ConfigRequest, ConfigSource, ConfigValue, ConfigVar, Snapshot, Watcher, WatcherOptions,
    WatcherStatus,
};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
