//! 配置构建模块
//!
//! 驱动配置源的 Stop/Configure/Read 流程，合并静态值与动态解析结果

use crate::error::SourcerError;
use crate::sourcer::{ConfigSourcer, SourcerRegistry};
use crate::sync::diff::DynamicGroups;
use crate::sync::types::{ConfigSource, ValueResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 单次构建的输入（冻结后的监听器状态）
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    /// 静态变量
    pub static_vars: &'a BTreeMap<String, String>,
    /// 按配置源分组的动态请求
    pub dynamic: &'a DynamicGroups,
    /// 配置源声明
    pub sources: &'a BTreeMap<String, ConfigSource>,
    /// 需要停止的配置源；值为 true 时同时释放句柄
    pub dirty: &'a BTreeMap<String, bool>,
}

/// 配置构建器
///
/// `registry` 是外部提供的、已启动的句柄；`active` 是当前有请求依赖的句柄。
/// 释放句柄只影响 `active`，进程生命周期由提供方负责。
pub struct ConfigBuilder {
    /// 已启动的配置源
    registry: SourcerRegistry,
    /// 当前活跃的配置源
    active: SourcerRegistry,
    /// 已告警过的未注册配置源类型
    unavailable: BTreeSet<String>,
}

impl ConfigBuilder {
    /// 创建构建器
    pub fn new(registry: SourcerRegistry) -> Self {
        Self {
            registry,
            active: SourcerRegistry::new(),
            unavailable: BTreeSet::new(),
        }
    }

    /// 当前活跃的配置源类型
    pub fn active_sources(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// 执行一次构建
    ///
    /// # 参数
    /// * `ctx` - 传给配置源的取消令牌
    /// * `input` - 冻结的输入状态
    ///
    /// # 返回
    /// * `Vec<String>` - 未排序的 `NAME=VALUE` 列表
    pub async fn build(&mut self, ctx: &CancellationToken, input: BuildInput<'_>) -> Vec<String> {
        self.stop_dirty(input.dirty).await;
        self.activate(input.dynamic, input.dirty);

        let mut errored = BTreeSet::new();
        self.configure(input, &mut errored).await;

        let mut result: Vec<String> = input
            .static_vars
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        for (source_type, requests) in input.dynamic {
            if errored.contains(source_type) {
                continue;
            }
            let Some(sourcer) = self.active.get(source_type) else {
                continue;
            };

            let values = match sourcer.read(ctx, requests).await {
                Ok(values) => values,
                Err(e) => {
                    warn!("读取配置源失败，本轮丢弃其全部值: {} - {}", source_type, e);
                    continue;
                }
            };

            let mut by_name = BTreeMap::new();
            for value in values {
                if !requests.iter().any(|request| request.name == value.name) {
                    warn!(
                        "配置源返回了未请求的变量，已忽略: {} - {}",
                        source_type, value.name
                    );
                    continue;
                }
                if by_name.contains_key(&value.name) {
                    warn!(
                        "配置源对同一变量返回了多个值，保留第一个: {} - {}",
                        source_type, value.name
                    );
                    continue;
                }
                by_name.insert(value.name.clone(), value.result);
            }

            for request in requests {
                match by_name.remove(&request.name) {
                    Some(ValueResult::Value(value)) => {
                        result.push(format!("{}={}", request.name, value));
                    }
                    Some(ValueResult::Error(message)) => {
                        warn!(
                            "解析动态变量失败，已丢弃: {} ({}) - {}",
                            request.name, source_type, message
                        );
                    }
                    None => {
                        warn!(
                            "配置源未返回请求的变量，已丢弃: {} ({})",
                            request.name, source_type
                        );
                    }
                }
            }
        }

        result
    }

    /// 停止所有活跃的配置源（监听器关闭时调用）
    pub async fn stop_all(&mut self) {
        for (source_type, sourcer) in std::mem::take(&mut self.active) {
            if let Err(e) = sourcer.stop().await {
                warn!("关闭时停止配置源失败: {} - {}", source_type, e);
            } else {
                debug!("已停止配置源: {}", source_type);
            }
        }
    }

    /// 停止发生变化的配置源，必要时释放句柄
    async fn stop_dirty(&mut self, dirty: &BTreeMap<String, bool>) {
        for (source_type, &teardown) in dirty {
            let Some(sourcer) = self.active.get(source_type) else {
                continue;
            };

            if let Err(e) = sourcer.stop().await {
                warn!("停止配置源失败，继续执行: {} - {}", source_type, e);
            }

            if teardown {
                self.active.remove(source_type);
                info!("配置源已无依赖，释放句柄: {}", source_type);
            }
        }
    }

    /// 为有请求的配置源类型取出句柄
    ///
    /// 未注册的类型只在其请求首次出现或发生变化时告警一次。
    fn activate(&mut self, dynamic: &DynamicGroups, dirty: &BTreeMap<String, bool>) {
        self.unavailable.retain(|source_type| {
            dynamic.contains_key(source_type) && !dirty.contains_key(source_type)
        });

        for source_type in dynamic.keys() {
            if self.active.contains_key(source_type) {
                continue;
            }
            match self.registry.get(source_type) {
                Some(sourcer) => {
                    debug!("启用配置源: {}", source_type);
                    self.active
                        .insert(source_type.clone(), Arc::clone(sourcer));
                }
                None => {
                    let err = SourcerError::Unavailable {
                        source_type: source_type.clone(),
                    };
                    if self.unavailable.insert(source_type.clone()) {
                        warn!("{}，相关变量将被丢弃", err);
                    } else {
                        debug!("{}，相关变量将被丢弃", err);
                    }
                }
            }
        }
    }

    /// 在读取前应用配置源设置
    async fn configure(&self, input: BuildInput<'_>, errored: &mut BTreeSet<String>) {
        for source_type in input.dynamic.keys() {
            let Some(source) = input.sources.get(source_type) else {
                continue;
            };
            if source.config.is_empty() {
                continue;
            }
            let Some(sourcer) = self.active.get(source_type) else {
                continue;
            };
            let Some(configurable) = sourcer.configurable() else {
                debug!("配置源不支持设置，忽略声明: {}", source_type);
                continue;
            };

            if let Err(e) = configurable.configure(&source.config).await {
                warn!("应用配置源设置失败，本轮跳过: {} - {}", source_type, e);
                errored.insert(source_type.clone());
            }
        }
    }
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("registry", &self.registry.keys().collect::<Vec<_>>())
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

/// 便于测试和嵌入方构造注册表
pub fn registry_from<I>(sourcers: I) -> SourcerRegistry
where
    I: IntoIterator<Item = (String, Arc<dyn ConfigSourcer>)>,
{
    sourcers.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourcerError;
    use crate::sourcer::{Configurable, MemorySourcer};
    use crate::sync::types::{ConfigRequest, ConfigValue, Settings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 返回各种不规范结果的配置源
    struct UnrulySourcer {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ConfigSourcer for UnrulySourcer {
        async fn read(
            &self,
            _ctx: &CancellationToken,
            requests: &[ConfigRequest],
        ) -> Result<Vec<ConfigValue>, SourcerError> {
            let mut values = vec![ConfigValue::value("FABRICATED", "x")];
            for request in requests {
                values.push(ConfigValue::value(&request.name, "first"));
                values.push(ConfigValue::value(&request.name, "second"));
            }
            Ok(values)
        }

        async fn stop(&self) -> Result<(), SourcerError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Err(SourcerError::Stop {
                source_type: "unruly".to_string(),
                message: "boom".to_string(),
            })
        }
    }

    /// 设置总是失败的配置源
    struct BadConfigSourcer;

    #[async_trait]
    impl ConfigSourcer for BadConfigSourcer {
        async fn read(
            &self,
            _ctx: &CancellationToken,
            requests: &[ConfigRequest],
        ) -> Result<Vec<ConfigValue>, SourcerError> {
            Ok(requests
                .iter()
                .map(|r| ConfigValue::value(&r.name, "v"))
                .collect())
        }

        async fn stop(&self) -> Result<(), SourcerError> {
            Ok(())
        }

        fn configurable(&self) -> Option<&dyn Configurable> {
            Some(self)
        }
    }

    #[async_trait]
    impl Configurable for BadConfigSourcer {
        async fn configure(&self, _settings: &Settings) -> Result<(), SourcerError> {
            Err(SourcerError::Configure {
                source_type: "bad".to_string(),
                message: "invalid".to_string(),
            })
        }
    }

    fn request(name: &str, key: &str) -> ConfigRequest {
        let mut config = Settings::new();
        config.insert("key".to_string(), key.to_string());
        ConfigRequest {
            name: name.to_string(),
            config,
        }
    }

    struct Fixture {
        static_vars: BTreeMap<String, String>,
        dynamic: DynamicGroups,
        sources: BTreeMap<String, ConfigSource>,
        dirty: BTreeMap<String, bool>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                static_vars: BTreeMap::new(),
                dynamic: DynamicGroups::new(),
                sources: BTreeMap::new(),
                dirty: BTreeMap::new(),
            }
        }

        fn input(&self) -> BuildInput<'_> {
            BuildInput {
                static_vars: &self.static_vars,
                dynamic: &self.dynamic,
                sources: &self.sources,
                dirty: &self.dirty,
            }
        }
    }

    #[tokio::test]
    async fn test_merges_static_and_dynamic() {
        let cloud = Arc::new(MemorySourcer::new("cloud").with_values([("key", "hello")]));
        let mut builder = ConfigBuilder::new(registry_from([(
            "cloud".to_string(),
            cloud.clone() as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture
            .static_vars
            .insert("PORT".to_string(), "8080".to_string());
        fixture
            .dynamic
            .insert("cloud".to_string(), vec![request("TEST_VALUE", "key")]);

        let mut result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        result.sort();

        assert_eq!(result, vec!["PORT=8080", "TEST_VALUE=hello"]);
        assert_eq!(builder.active_sources(), vec!["cloud".to_string()]);
    }

    #[tokio::test]
    async fn test_read_error_drops_only_that_type() {
        let cloud = Arc::new(MemorySourcer::new("cloud").with_values([("key", "hello")]));
        let vault = Arc::new(MemorySourcer::new("vault").with_values([("db", "secret")]));
        cloud.set_fail_reads(true);

        let mut builder = ConfigBuilder::new(registry_from([
            ("cloud".to_string(), cloud.clone() as Arc<dyn ConfigSourcer>),
            ("vault".to_string(), vault.clone() as Arc<dyn ConfigSourcer>),
        ]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("cloud".to_string(), vec![request("A", "key")]);
        fixture
            .dynamic
            .insert("vault".to_string(), vec![request("B", "db")]);

        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["B=secret"]);
    }

    #[tokio::test]
    async fn test_missing_and_error_values_are_dropped() {
        let cloud = Arc::new(MemorySourcer::new("cloud").with_values([("present", "yes")]));
        let mut builder = ConfigBuilder::new(registry_from([(
            "cloud".to_string(),
            cloud as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture.dynamic.insert(
            "cloud".to_string(),
            vec![request("A", "present"), request("B", "absent")],
        );

        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["A=yes"]);
    }

    #[tokio::test]
    async fn test_fabricated_and_duplicate_values_ignored() {
        let unruly = Arc::new(UnrulySourcer {
            stops: AtomicUsize::new(0),
        });
        let mut builder = ConfigBuilder::new(registry_from([(
            "unruly".to_string(),
            unruly.clone() as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("unruly".to_string(), vec![request("A", "a")]);

        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["A=first"]);
    }

    #[tokio::test]
    async fn test_stop_error_is_not_fatal() {
        let unruly = Arc::new(UnrulySourcer {
            stops: AtomicUsize::new(0),
        });
        let mut builder = ConfigBuilder::new(registry_from([(
            "unruly".to_string(),
            unruly.clone() as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("unruly".to_string(), vec![request("A", "a")]);
        builder
            .build(&CancellationToken::new(), fixture.input())
            .await;

        fixture.dirty.insert("unruly".to_string(), false);
        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;

        assert_eq!(unruly.stops.load(Ordering::SeqCst), 1);
        assert_eq!(result, vec!["A=first"]);
    }

    #[tokio::test]
    async fn test_configure_failure_skips_read() {
        let mut builder = ConfigBuilder::new(registry_from([(
            "bad".to_string(),
            Arc::new(BadConfigSourcer) as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("bad".to_string(), vec![request("A", "a")]);
        let mut settings = Settings::new();
        settings.insert("region".to_string(), "eu".to_string());
        fixture
            .sources
            .insert("bad".to_string(), ConfigSource::new("bad", settings));

        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert!(result.is_empty());

        // 没有声明设置时照常读取
        fixture.sources.clear();
        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["A=v"]);
    }

    #[tokio::test]
    async fn test_teardown_releases_active_handle() {
        let cloud = Arc::new(MemorySourcer::new("cloud").with_values([("key", "hello")]));
        let mut builder = ConfigBuilder::new(registry_from([(
            "cloud".to_string(),
            cloud.clone() as Arc<dyn ConfigSourcer>,
        )]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("cloud".to_string(), vec![request("A", "key")]);
        builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(cloud.stop_count(), 0);

        fixture.dynamic.clear();
        fixture.dirty.insert("cloud".to_string(), true);
        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;

        assert!(result.is_empty());
        assert_eq!(cloud.stop_count(), 1);
        assert!(builder.active_sources().is_empty());

        // 句柄仍在注册表中，可再次启用
        fixture.dirty.clear();
        fixture
            .dynamic
            .insert("cloud".to_string(), vec![request("A", "key")]);
        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["A=hello"]);
    }

    #[tokio::test]
    async fn test_unregistered_type_is_dropped() {
        let mut builder = ConfigBuilder::new(SourcerRegistry::new());
        let mut fixture = Fixture::new();
        fixture
            .static_vars
            .insert("A".to_string(), "1".to_string());
        fixture
            .dynamic
            .insert("missing".to_string(), vec![request("B", "b")]);

        let result = builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(result, vec!["A=1"]);
    }

    /// 收集日志输出的写入器
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_unregistered_type_warns_once_per_change() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut builder = ConfigBuilder::new(SourcerRegistry::new());
        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("missing".to_string(), vec![request("B", "b")]);
        fixture.dirty.insert("missing".to_string(), false);

        builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(logs.count("配置源不可用"), 1);

        // 周期刷新：请求未变化，不再告警
        fixture.dirty.clear();
        for _ in 0..3 {
            builder
                .build(&CancellationToken::new(), fixture.input())
                .await;
        }
        assert_eq!(logs.count("配置源不可用"), 1);

        // 请求变化后重新告警一次
        fixture
            .dynamic
            .insert("missing".to_string(), vec![request("C", "c")]);
        fixture.dirty.insert("missing".to_string(), false);
        builder
            .build(&CancellationToken::new(), fixture.input())
            .await;
        assert_eq!(logs.count("配置源不可用"), 2);
    }

    #[tokio::test]
    async fn test_stop_all_stops_active_only() {
        let cloud = Arc::new(MemorySourcer::new("cloud").with_values([("key", "hello")]));
        let idle = Arc::new(MemorySourcer::new("idle"));
        let mut builder = ConfigBuilder::new(registry_from([
            ("cloud".to_string(), cloud.clone() as Arc<dyn ConfigSourcer>),
            ("idle".to_string(), idle.clone() as Arc<dyn ConfigSourcer>),
        ]));

        let mut fixture = Fixture::new();
        fixture
            .dynamic
            .insert("cloud".to_string(), vec![request("A", "key")]);
        builder
            .build(&CancellationToken::new(), fixture.input())
            .await;

        builder.stop_all().await;
        assert_eq!(cloud.stop_count(), 1);
        assert_eq!(idle.stop_count(), 0);
        assert!(builder.active_sources().is_empty());
    }
}
