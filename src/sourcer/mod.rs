//! 配置源模块
//!
//! 定义配置源能力接口，并提供内存实现

pub mod memory;
pub mod traits;

// 重新导出主要类型
pub use memory::{MemorySettings, MemorySourcer};
pub use traits::{decode_settings, ConfigSourcer, Configurable, SourcerRegistry};
