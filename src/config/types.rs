//! 配置数据结构定义
//!
//! 定义引擎设置（监听器与日志）的结构体和验证逻辑

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// 监听器设置
    #[serde(default)]
    pub watcher: WatcherSettings,
    /// 日志设置
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// 监听器设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatcherSettings {
    /// 稳态刷新间隔（毫秒）
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
    /// 防抖动延迟（毫秒）
    #[serde(default = "default_coalesce_delay")]
    pub coalesce_delay_ms: u64,
    /// 强制刷新上限（毫秒）
    #[serde(default = "default_force_delay")]
    pub force_delay_ms: u64,
    /// 是否解析动态变量
    #[serde(default = "default_dynamic_enabled")]
    pub dynamic_enabled: bool,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval(),
            coalesce_delay_ms: default_coalesce_delay(),
            force_delay_ms: default_force_delay(),
            dynamic_enabled: default_dynamic_enabled(),
        }
    }
}

/// 日志设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出到控制台
    #[serde(default = "default_console")]
    pub console: bool,
    /// 是否使用JSON格式
    #[serde(default)]
    pub json: bool,
    /// 日志文件路径
    pub file: Option<PathBuf>,
    /// 模块级别日志控制
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: default_console(),
            json: false,
            file: None,
            modules: HashMap::new(),
        }
    }
}

// 默认值函数
fn default_refresh_interval() -> u64 {
    15_000
}
fn default_coalesce_delay() -> u64 {
    500
}
fn default_force_delay() -> u64 {
    5_000
}
fn default_dynamic_enabled() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_console() -> bool {
    true
}

/// 支持的日志级别
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &SyncConfig) -> Result<(), String> {
    let watcher = &config.watcher;

    if watcher.refresh_interval_ms == 0 {
        return Err("刷新间隔不能为0".to_string());
    }

    if watcher.coalesce_delay_ms == 0 {
        return Err("防抖动延迟不能为0".to_string());
    }

    if watcher.force_delay_ms == 0 {
        return Err("强制刷新上限不能为0".to_string());
    }

    if watcher.coalesce_delay_ms > watcher.force_delay_ms {
        return Err(format!(
            "防抖动延迟 {}ms 不能大于强制刷新上限 {}ms",
            watcher.coalesce_delay_ms, watcher.force_delay_ms
        ));
    }

    // 验证日志级别
    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            config.logging.level, VALID_LOG_LEVELS
        ));
    }

    for (module, level) in &config.logging.modules {
        if module.trim().is_empty() {
            return Err("模块名称不能为空".to_string());
        }
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!("模块 {module} 的日志级别无效: {level}"));
        }
    }

    if !config.logging.console && config.logging.file.is_none() {
        return Err("关闭控制台输出时必须指定日志文件".to_string());
    }

    Ok(())
}
