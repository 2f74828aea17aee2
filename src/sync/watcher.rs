//! 配置监听器模块
//!
//! 单一事件循环串行处理所有输入：变量更新、配置源更新、刷新计时与关闭信号。
//! 每轮刷新调用配置构建器，结果排序后与上次发布的快照比较，有变化才发布新代数。

use crate::config::types::WatcherSettings;
use crate::error::{ConfigSyncError, Result, WatchError};
use crate::sourcer::{ConfigSourcer, SourcerRegistry};
use crate::sync::builder::{BuildInput, ConfigBuilder};
use crate::sync::diff::{
    diff_dynamic, diff_sources, index_sources, normalize_vars, split_vars, DynamicChange,
    DynamicGroups, NormalizedVars,
};
use crate::sync::publisher::GenerationPublisher;
use crate::sync::scheduler::{RefreshPolicy, RefreshScheduler, RefreshTrigger};
use crate::sync::types::{ConfigSource, ConfigVar, Snapshot};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, info_span, Dispatch, Instrument, Span};

/// 监听器构造选项
#[derive(Clone)]
pub struct WatcherOptions {
    /// 日志输出目标，缺省使用进程级订阅者
    logger: Option<Dispatch>,
    /// 已启动的配置源
    plugins: SourcerRegistry,
    /// 快照转发通道
    notify: Option<watch::Sender<Snapshot>>,
    /// 刷新策略
    policy: RefreshPolicy,
    /// 是否解析动态变量
    dynamic_enabled: bool,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            logger: None,
            plugins: SourcerRegistry::new(),
            notify: None,
            policy: RefreshPolicy::default(),
            dynamic_enabled: true,
        }
    }
}

impl WatcherOptions {
    /// 默认选项
    pub fn new() -> Self {
        Self::default()
    }

    /// 由配置文件中的监听器设置生成选项
    pub fn from_settings(settings: &WatcherSettings) -> Self {
        Self::default()
            .with_refresh_interval(Duration::from_millis(settings.refresh_interval_ms))
            .with_coalesce_delay(Duration::from_millis(settings.coalesce_delay_ms))
            .with_force_delay(Duration::from_millis(settings.force_delay_ms))
            .with_dynamic_enabled(settings.dynamic_enabled)
    }

    /// 指定日志输出目标
    pub fn with_logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    /// 替换配置源注册表
    pub fn with_plugins(mut self, plugins: SourcerRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// 注册单个配置源
    pub fn with_plugin(
        mut self,
        source_type: impl Into<String>,
        sourcer: Arc<dyn ConfigSourcer>,
    ) -> Self {
        self.plugins.insert(source_type.into(), sourcer);
        self
    }

    /// 启用快照转发
    pub fn with_notify(mut self, sender: watch::Sender<Snapshot>) -> Self {
        self.notify = Some(sender);
        self
    }

    /// 稳态刷新间隔
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.policy.refresh_interval = interval;
        self
    }

    /// 防抖动延迟
    pub fn with_coalesce_delay(mut self, delay: Duration) -> Self {
        self.policy.coalesce_delay = delay;
        self
    }

    /// 强制刷新上限
    pub fn with_force_delay(mut self, delay: Duration) -> Self {
        self.policy.force_delay = delay;
        self
    }

    /// 是否解析动态变量
    pub fn with_dynamic_enabled(mut self, enabled: bool) -> Self {
        self.dynamic_enabled = enabled;
        self
    }
}

impl std::fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("logger", &self.logger.is_some())
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("notify", &self.notify.is_some())
            .field("policy", &self.policy)
            .field("dynamic_enabled", &self.dynamic_enabled)
            .finish()
    }
}

/// 监听器状态
#[derive(Debug, Clone, Default)]
pub struct WatcherStatus {
    /// 最新发布的代数
    pub generation: u64,
    /// 已完成的刷新次数
    pub refresh_count: u64,
    /// 最后一次刷新时间
    pub last_refresh_at: Option<DateTime<Utc>>,
    /// 最后一次刷新的触发原因
    pub last_trigger: Option<RefreshTrigger>,
    /// 当前活跃的配置源类型
    pub active_sources: Vec<String>,
    /// 事件循环是否运行中
    pub is_running: bool,
}

/// 提交给事件循环的更新
#[derive(Debug)]
enum Update {
    Vars(Vec<ConfigVar>),
    Sources(Vec<ConfigSource>),
}

/// 一次握手：更新及其接收确认
#[derive(Debug)]
struct Handoff {
    update: Update,
    accepted: oneshot::Sender<()>,
}

/// 配置监听器
///
/// 唯一的公共入口。所有状态由内部事件循环独占，外部通过同一条握手
/// 通道按提交顺序递交更新，事件循环取走更新后提交调用才返回。
pub struct Watcher {
    /// 更新握手通道
    updates_tx: mpsc::Sender<Handoff>,
    /// 快照发布器
    publisher: Arc<GenerationPublisher>,
    /// 状态
    status: Arc<RwLock<WatcherStatus>>,
    /// 关闭信号
    shutdown: CancellationToken,
    /// 后台任务
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Watcher {
    /// 创建监听器并启动事件循环
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn new(options: WatcherOptions) -> Self {
        let shutdown = CancellationToken::new();
        let publisher = Arc::new(GenerationPublisher::new(shutdown.clone()));
        let status = Arc::new(RwLock::new(WatcherStatus {
            is_running: true,
            ..WatcherStatus::default()
        }));

        let (updates_tx, updates_rx) = mpsc::channel(1);

        let event_loop = EventLoop {
            updates_rx,
            publisher: Arc::clone(&publisher),
            builder: ConfigBuilder::new(options.plugins),
            scheduler: RefreshScheduler::new(options.policy),
            dynamic_enabled: options.dynamic_enabled,
            vars: None,
            static_vars: BTreeMap::new(),
            dynamic: DynamicGroups::new(),
            sources: BTreeMap::new(),
            dirty: BTreeMap::new(),
            published: None,
            status: Arc::clone(&status),
            shutdown: shutdown.clone(),
        };

        let logger = options.logger;
        let mut tasks = vec![spawn_traced(
            logger.as_ref(),
            || info_span!("config_watcher"),
            event_loop.run(),
        )];

        if let Some(sender) = options.notify {
            let publisher = Arc::clone(&publisher);
            tasks.push(spawn_traced(
                logger.as_ref(),
                || info_span!("config_watcher_notify"),
                async move { publisher.forward(sender).await },
            ));
        }

        info!(
            "配置监听器已启动，刷新间隔: {:?}，动态解析: {}",
            options.policy.refresh_interval, options.dynamic_enabled
        );

        Self {
            updates_tx,
            publisher,
            status,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// 提交新的变量集合
    ///
    /// 阻塞直到事件循环接收，或 `ctx` 被取消。返回 `Cancelled` 时
    /// 本次更新不会生效。
    ///
    /// # 参数
    /// * `ctx` - 取消令牌
    /// * `vars` - 完整的变量集合
    pub async fn update_vars(&self, ctx: &CancellationToken, vars: Vec<ConfigVar>) -> Result<()> {
        self.handoff(ctx, Update::Vars(vars)).await
    }

    /// 提交新的配置源声明
    ///
    /// # 参数
    /// * `ctx` - 取消令牌
    /// * `sources` - 完整的配置源声明集合
    pub async fn update_sources(
        &self,
        ctx: &CancellationToken,
        sources: Vec<ConfigSource>,
    ) -> Result<()> {
        self.handoff(ctx, Update::Sources(sources)).await
    }

    /// 等待代数超过 `iter` 的快照
    ///
    /// # 参数
    /// * `ctx` - 取消令牌
    /// * `iter` - 调用方已见过的代数，首次调用传 0
    pub async fn next(&self, ctx: &CancellationToken, iter: u64) -> Result<Snapshot> {
        Ok(self.publisher.next(ctx, iter).await?)
    }

    /// 当前快照，不等待
    pub async fn current(&self) -> Snapshot {
        self.publisher.current().await
    }

    /// 当前状态
    pub async fn status(&self) -> WatcherStatus {
        self.status.read().await.clone()
    }

    /// 关闭监听器
    ///
    /// 停止事件循环并等待其退出（退出前停止所有活跃的配置源）。
    /// 可重复调用，之后的调用立即返回。
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    return Err(ConfigSyncError::Other(anyhow::anyhow!(
                        "监听器后台任务崩溃: {e}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// 把一个更新交给事件循环，等到事件循环确认取走后返回
    async fn handoff(&self, ctx: &CancellationToken, update: Update) -> Result<()> {
        let (accepted, ack) = oneshot::channel();

        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(WatchError::Cancelled.into()),
            _ = self.shutdown.cancelled() => return Err(WatchError::Closed.into()),
            permit = self.updates_tx.reserve() => {
                let permit = permit.map_err(|_| WatchError::Closed)?;
                permit.send(Handoff { update, accepted });
            }
        }

        // 放弃等待会丢弃确认端，事件循环据此丢弃这次更新
        tokio::select! {
            biased;
            result = ack => match result {
                Ok(()) => Ok(()),
                Err(_) => Err(WatchError::Closed.into()),
            },
            _ = ctx.cancelled() => Err(WatchError::Cancelled.into()),
            _ = self.shutdown.cancelled() => Err(WatchError::Closed.into()),
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // 未显式关闭时至少发出停止信号
        self.shutdown.cancel();
    }
}

/// 在指定日志目标与 span 中运行后台任务
fn spawn_traced<F>(
    logger: Option<&Dispatch>,
    make_span: impl Fn() -> Span,
    future: F,
) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match logger {
        Some(dispatch) => {
            let span = tracing::dispatcher::with_default(dispatch, make_span);
            tokio::spawn(future.instrument(span).with_subscriber(dispatch.clone()))
        }
        None => tokio::spawn(future.instrument(make_span())),
    }
}

/// 事件循环独占的状态
struct EventLoop {
    updates_rx: mpsc::Receiver<Handoff>,
    publisher: Arc<GenerationPublisher>,
    builder: ConfigBuilder,
    scheduler: RefreshScheduler,
    dynamic_enabled: bool,
    /// 上一次接收的变量（规范化后），尚未接收过时为 None
    vars: Option<NormalizedVars>,
    static_vars: BTreeMap<String, String>,
    dynamic: DynamicGroups,
    sources: BTreeMap<String, ConfigSource>,
    /// 待停止的配置源；值为 true 表示同时释放句柄
    dirty: BTreeMap<String, bool>,
    /// 上一次发布的内容
    published: Option<Vec<String>>,
    status: Arc<RwLock<WatcherStatus>>,
    shutdown: CancellationToken,
}

impl EventLoop {
    async fn run(mut self) {
        debug!("配置监听事件循环开始运行");

        loop {
            let wakeup = self.scheduler.next_wakeup();

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(handoff) = self.updates_rx.recv() => self.on_handoff(handoff),
                _ = sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {
                    if let Some(trigger) = self.scheduler.on_wakeup(Instant::now()) {
                        self.refresh(trigger).await;
                    }
                }
            }
        }

        info!("配置监听器正在关闭，停止活跃的配置源");
        self.builder.stop_all().await;

        let mut status = self.status.write().await;
        status.is_running = false;
        status.active_sources.clear();
    }

    /// 确认接收并按提交顺序应用一个更新
    fn on_handoff(&mut self, handoff: Handoff) {
        if handoff.accepted.send(()).is_err() {
            debug!("提交方已放弃等待，丢弃本次更新");
            return;
        }

        match handoff.update {
            Update::Vars(vars) => self.on_vars(vars),
            Update::Sources(sources) => self.on_sources(sources),
        }
    }

    /// 处理变量更新
    fn on_vars(&mut self, vars: Vec<ConfigVar>) {
        let normalized = normalize_vars(&vars);

        if self.published.is_some() && self.vars.as_ref() == Some(&normalized) {
            debug!("变量集合无变化，忽略本次更新");
            return;
        }

        let (static_vars, mut dynamic) = split_vars(&normalized);
        if !self.dynamic_enabled && !dynamic.is_empty() {
            debug!("动态解析已禁用，丢弃 {} 个配置源的请求", dynamic.len());
            dynamic.clear();
        }

        for (source_type, change) in diff_dynamic(&self.dynamic, &dynamic) {
            debug!("动态请求变更: {} {:?}", source_type, change);
            let teardown = change == DynamicChange::Removed;
            *self.dirty.entry(source_type).or_insert(false) |= teardown;
        }

        info!(
            "接收变量更新: 静态 {} 个，动态配置源 {} 个",
            static_vars.len(),
            dynamic.len()
        );

        self.vars = Some(normalized);
        self.static_vars = static_vars;
        self.dynamic = dynamic;
        self.scheduler.schedule(Instant::now());
    }

    /// 处理配置源更新
    fn on_sources(&mut self, sources: Vec<ConfigSource>) {
        let sources = index_sources(&sources);
        let changes = diff_sources(&self.sources, &sources);
        self.sources = sources;

        let mut scheduled = false;
        for (source_type, change) in changes {
            if !self.dynamic.contains_key(&source_type) {
                debug!("配置源无变量依赖，忽略变更: {} {:?}", source_type, change);
                continue;
            }
            debug!("配置源设置变更: {} {:?}", source_type, change);
            self.dirty.entry(source_type).or_insert(false);
            scheduled = true;
        }

        if scheduled {
            self.scheduler.schedule(Instant::now());
        }
    }

    /// 执行一轮刷新
    async fn refresh(&mut self, trigger: RefreshTrigger) {
        debug!("开始刷新配置，触发原因: {:?}", trigger);

        let dirty = std::mem::take(&mut self.dirty);
        let input = BuildInput {
            static_vars: &self.static_vars,
            dynamic: &self.dynamic,
            sources: &self.sources,
            dirty: &dirty,
        };

        let mut vars = self.builder.build(&self.shutdown, input).await;
        vars.sort();

        let generation = if self.published.as_ref() != Some(&vars) {
            self.published = Some(vars.clone());
            let generation = self.publisher.publish(vars).await;
            info!("发布新的配置快照，代数: {}", generation);
            generation
        } else {
            debug!("配置无变化，不发布新快照");
            self.publisher.generation().await
        };

        self.scheduler.complete(Instant::now());

        let mut status = self.status.write().await;
        status.generation = generation;
        status.refresh_count += 1;
        status.last_refresh_at = Some(Utc::now());
        status.last_trigger = Some(trigger);
        status.active_sources = self.builder.active_sources();
    }
}
