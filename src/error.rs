//! 错误处理模块
//!
//! 定义配置同步引擎的统一错误类型

use thiserror::Error;

/// Config Sync 的主要错误类型
#[derive(Error, Debug)]
pub enum ConfigSyncError {
    /// 监听器相关错误
    #[error("监听器错误: {0}")]
    Watch(#[from] WatchError),

    /// 配置源（sourcer）相关错误
    #[error("配置源错误: {0}")]
    Sourcer(#[from] SourcerError),

    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl ConfigSyncError {
    /// 是否为调用方取消导致的错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConfigSyncError::Watch(WatchError::Cancelled))
    }

    /// 是否为监听器已关闭导致的错误
    pub fn is_closed(&self) -> bool {
        matches!(self, ConfigSyncError::Watch(WatchError::Closed))
    }
}

/// 监听器错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// 调用方的取消令牌已触发
    #[error("操作已取消")]
    Cancelled,

    /// 监听器已关闭
    #[error("监听器已关闭")]
    Closed,
}

/// 配置源错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourcerError {
    /// 读取失败
    #[error("配置源 {source_type} 读取失败: {message}")]
    Read {
        source_type: String,
        message: String,
    },

    /// 应用配置失败
    #[error("配置源 {source_type} 应用配置失败: {message}")]
    Configure {
        source_type: String,
        message: String,
    },

    /// 停止失败
    #[error("配置源 {source_type} 停止失败: {message}")]
    Stop {
        source_type: String,
        message: String,
    },

    /// 配置项无法解码
    #[error("配置源 {source_type} 配置项无效: {message}")]
    InvalidSettings {
        source_type: String,
        message: String,
    },

    /// 配置源类型未注册
    #[error("配置源不可用（未注册）: {source_type}")]
    Unavailable { source_type: String },
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ConfigSyncError>;
