//! 刷新调度模块
//!
//! 把一连串更新合并为有限次数的重建：防抖动延迟 + 强制上限 + 稳态轮询

use std::time::Duration;
use tokio::time::Instant;

/// 默认防抖动延迟
pub const DEFAULT_COALESCE_DELAY: Duration = Duration::from_millis(500);
/// 默认强制刷新上限
pub const DEFAULT_FORCE_DELAY: Duration = Duration::from_secs(5);
/// 默认稳态刷新间隔
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// 刷新策略参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// 每次更新后等待的安静期
    pub coalesce_delay: Duration,
    /// 从第一次更新起的最长等待时间
    pub force_delay: Duration,
    /// 稳态下的无条件刷新间隔
    pub refresh_interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            coalesce_delay: DEFAULT_COALESCE_DELAY,
            force_delay: DEFAULT_FORCE_DELAY,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// 触发刷新的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// 安静期结束
    Coalesced,
    /// 到达强制上限
    Forced,
    /// 稳态轮询
    Periodic,
}

/// 刷新调度器
///
/// 只维护截止时间，不持有任何计时任务；事件循环根据 `next_wakeup`
/// 睡眠，醒来后调用 `on_wakeup` 判断是否需要刷新。
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    /// 策略参数
    policy: RefreshPolicy,
    /// 防抖动截止时间
    coalesce_at: Option<Instant>,
    /// 强制刷新截止时间
    force_at: Option<Instant>,
    /// 强制刷新是否由安静期结束提前触发
    coalesced: bool,
    /// 稳态刷新截止时间（第一次刷新完成后才启用）
    periodic_at: Option<Instant>,
}

impl RefreshScheduler {
    /// 创建调度器
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            coalesce_at: None,
            force_at: None,
            coalesced: false,
            periodic_at: None,
        }
    }

    /// 是否有待执行的刷新
    pub fn is_pending(&self) -> bool {
        self.coalesce_at.is_some() || self.force_at.is_some()
    }

    /// 收到一次需要重建的更新
    ///
    /// 防抖动计时从现在重新开始；强制计时只在空闲后的第一次更新时启动，
    /// 挂起期间不会被推迟。
    pub fn schedule(&mut self, now: Instant) {
        self.coalesce_at = Some(now + self.policy.coalesce_delay);
        if self.force_at.is_none() {
            self.force_at = Some(now + self.policy.force_delay);
            self.coalesced = false;
        }
    }

    /// 下一次需要醒来的时间
    pub fn next_wakeup(&self) -> Option<Instant> {
        [self.coalesce_at, self.force_at, self.periodic_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// 醒来后推进计时器，返回是否应立即刷新
    pub fn on_wakeup(&mut self, now: Instant) -> Option<RefreshTrigger> {
        if self.coalesce_at.is_some_and(|at| at <= now) {
            self.coalesce_at = None;
            self.force_at = Some(now);
            self.coalesced = true;
        }

        if self.force_at.is_some_and(|at| at <= now) {
            return Some(if self.coalesced {
                RefreshTrigger::Coalesced
            } else {
                RefreshTrigger::Forced
            });
        }

        if self.periodic_at.is_some_and(|at| at <= now) {
            return Some(RefreshTrigger::Periodic);
        }

        None
    }

    /// 一次刷新完成：清除挂起的计时并重新开始稳态计时
    pub fn complete(&mut self, now: Instant) {
        self.coalesce_at = None;
        self.force_at = None;
        self.coalesced = false;
        self.periodic_at = Some(now + self.policy.refresh_interval);
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(RefreshPolicy::default())
    }
}
