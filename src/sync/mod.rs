//! 配置同步模块
//!
//! 包含监听器事件循环、刷新调度、配置构建和快照发布

pub mod builder;
pub mod diff;
pub mod publisher;
pub mod scheduler;
pub mod types;
pub mod watcher;

// 重新导出主要类型
pub use builder::{registry_from, BuildInput, ConfigBuilder};
pub use diff::{diff_dynamic, diff_sources, DynamicChange, DynamicGroups, SourceChange};
pub use publisher::GenerationPublisher;
pub use scheduler::{RefreshPolicy, RefreshScheduler, RefreshTrigger};
pub use types::{
    ConfigRequest, ConfigSource, ConfigValue, ConfigVar, DynamicValue, Settings, Snapshot,
    ValueResult, VarValue,
};
pub use watcher::{Watcher, WatcherOptions, WatcherStatus};
