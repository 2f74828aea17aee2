//! 配置源接口定义
//!
//! 引擎只依赖这里的能力接口；具体的密钥存储、云 API 等实现由外部提供

use crate::error::SourcerError;
use crate::sync::types::{ConfigRequest, ConfigValue, Settings};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 已启动的配置源句柄注册表，按配置源类型索引
pub type SourcerRegistry = BTreeMap<String, Arc<dyn ConfigSourcer>>;

/// 配置源trait，解析动态配置值
///
/// 实现方需要保证：
/// - `read` 可在每个刷新周期被调用，缓存与退避策略由实现方自行负责
/// - `read` 对每个请求名最多返回一个值，且不返回未被请求的名称
/// - `stop` 幂等，在无状态可清理时不得报错
#[async_trait]
pub trait ConfigSourcer: Send + Sync {
    /// 读取一组请求的值
    ///
    /// # 参数
    /// * `ctx` - 取消令牌
    /// * `requests` - 该配置源类型的全部请求
    ///
    /// # 返回
    /// * `Result<Vec<ConfigValue>, SourcerError>` - 每个请求名对应的结果
    async fn read(
        &self,
        ctx: &CancellationToken,
        requests: &[ConfigRequest],
    ) -> Result<Vec<ConfigValue>, SourcerError>;

    /// 请求集合已变化，丢弃按请求缓存的状态
    async fn stop(&self) -> Result<(), SourcerError>;

    /// 若支持配置则返回配置接口
    fn configurable(&self) -> Option<&dyn Configurable> {
        None
    }
}

/// 可配置的配置源
#[async_trait]
pub trait Configurable: Send + Sync {
    /// 应用配置源设置，须在下一次 `read` 前生效
    async fn configure(&self, settings: &Settings) -> Result<(), SourcerError>;
}

/// 将字符串设置解码为具体的设置结构
///
/// # 参数
/// * `source_type` - 配置源类型（用于错误信息）
/// * `settings` - 原始设置
///
/// # 返回
/// * `Result<T, SourcerError>` - 解码结果
pub fn decode_settings<T: DeserializeOwned>(
    source_type: &str,
    settings: &Settings,
) -> Result<T, SourcerError> {
    let value = serde_json::to_value(settings).map_err(|e| SourcerError::InvalidSettings {
        source_type: source_type.to_string(),
        message: e.to_string(),
    })?;

    serde_json::from_value(value).map_err(|e| SourcerError::InvalidSettings {
        source_type: source_type.to_string(),
        message: e.to_string(),
    })
}
