//! 内存配置源
//!
//! 从共享的内存映射解析请求，适用于测试和嵌入场景

use crate::error::SourcerError;
use crate::sourcer::traits::{decode_settings, ConfigSourcer, Configurable};
use crate::sync::types::{ConfigRequest, ConfigValue, Settings};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 内存配置源的设置
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MemorySettings {
    /// 查找键的前缀
    #[serde(default)]
    pub prefix: String,
}

/// 内存配置源
///
/// 请求参数 `key` 指定查找键，缺省时使用变量名；设置中的 `prefix` 会拼接在键前面。
#[derive(Debug)]
pub struct MemorySourcer {
    /// 配置源类型
    source_type: String,
    /// 存储的值
    values: RwLock<HashMap<String, String>>,
    /// 当前设置
    settings: RwLock<MemorySettings>,
    /// 是否让读取失败
    fail_reads: AtomicBool,
    /// `read` 调用次数
    read_count: AtomicUsize,
    /// `stop` 调用次数
    stop_count: AtomicUsize,
    /// `configure` 调用次数
    configure_count: AtomicUsize,
}

impl MemorySourcer {
    /// 创建内存配置源
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            values: RwLock::new(HashMap::new()),
            settings: RwLock::new(MemorySettings::default()),
            fail_reads: AtomicBool::new(false),
            read_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            configure_count: AtomicUsize::new(0),
        }
    }

    /// 预置初始值
    pub fn with_values<I, K, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: RwLock::new(values),
            ..self
        }
    }

    /// 配置源类型
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// 设置一个值
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(key.into(), value.into());
    }

    /// 删除一个值
    pub async fn remove(&self, key: &str) -> Option<String> {
        self.values.write().await.remove(key)
    }

    /// 让后续读取整体失败（或恢复）
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 当前设置
    pub async fn settings(&self) -> MemorySettings {
        self.settings.read().await.clone()
    }

    /// `read` 调用次数
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// `stop` 调用次数
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// `configure` 调用次数
    pub fn configure_count(&self) -> usize {
        self.configure_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigSourcer for MemorySourcer {
    async fn read(
        &self,
        ctx: &CancellationToken,
        requests: &[ConfigRequest],
    ) -> Result<Vec<ConfigValue>, SourcerError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);

        if ctx.is_cancelled() {
            return Err(SourcerError::Read {
                source_type: self.source_type.clone(),
                message: "读取已取消".to_string(),
            });
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SourcerError::Read {
                source_type: self.source_type.clone(),
                message: "内存配置源被设置为读取失败".to_string(),
            });
        }

        let prefix = self.settings.read().await.prefix.clone();
        let values = self.values.read().await;

        let results = requests
            .iter()
            .map(|request| {
                let key = request
                    .config
                    .get("key")
                    .map(String::as_str)
                    .unwrap_or(&request.name);
                let full_key = format!("{prefix}{key}");

                match values.get(&full_key) {
                    Some(value) => ConfigValue::value(&request.name, value),
                    None => ConfigValue::error(&request.name, format!("键不存在: {full_key}")),
                }
            })
            .collect();

        Ok(results)
    }

    async fn stop(&self) -> Result<(), SourcerError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        debug!("内存配置源已停止: {}", self.source_type);
        Ok(())
    }

    fn configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }
}

#[async_trait]
impl Configurable for MemorySourcer {
    async fn configure(&self, settings: &Settings) -> Result<(), SourcerError> {
        self.configure_count.fetch_add(1, Ordering::SeqCst);
        let decoded: MemorySettings = decode_settings(&self.source_type, settings)?;
        *self.settings.write().await = decoded;
        Ok(())
    }
}
