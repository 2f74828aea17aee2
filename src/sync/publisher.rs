//! 快照发布模块
//!
//! 持有最新快照与单调递增的代数，支持阻塞等待新代数、取消以及向
//! `watch` 通道转发（慢消费者只会看到最新值）

use crate::error::WatchError;
use crate::sync::types::Snapshot;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 代数计数的快照发布器
#[derive(Debug)]
pub struct GenerationPublisher {
    /// 当前快照（含代数）
    state: Mutex<Snapshot>,
    /// 发布广播
    notify: Notify,
    /// 关闭信号，触发后唤醒所有等待者
    shutdown: CancellationToken,
}

impl GenerationPublisher {
    /// 创建发布器
    ///
    /// # 参数
    /// * `shutdown` - 关闭信号
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            state: Mutex::new(Snapshot::initial()),
            notify: Notify::new(),
            shutdown,
        }
    }

    /// 获取当前快照，不等待
    pub async fn current(&self) -> Snapshot {
        self.state.lock().await.clone()
    }

    /// 当前代数
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation()
    }

    /// 等待代数超过 `iter`
    ///
    /// 若当前代数已大于 `iter` 则立即返回；否则阻塞直到有新的发布、
    /// `ctx` 被取消（返回 `Cancelled`）或发布器关闭（返回 `Closed`）。
    ///
    /// # 参数
    /// * `ctx` - 调用方取消令牌
    /// * `iter` - 调用方已见过的代数
    pub async fn next(&self, ctx: &CancellationToken, iter: u64) -> Result<Snapshot, WatchError> {
        loop {
            // 先登记再检查，避免检查与等待之间的发布被错过
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock().await;
                if state.generation() > iter {
                    return Ok(state.clone());
                }
            }

            if ctx.is_cancelled() {
                return Err(WatchError::Cancelled);
            }
            if self.shutdown.is_cancelled() {
                return Err(WatchError::Closed);
            }

            tokio::select! {
                _ = &mut notified => {
                    trace!("发布器唤醒，重新检查代数: {}", iter);
                }
                _ = ctx.cancelled() => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// 发布新快照，代数加一并唤醒所有等待者
    ///
    /// # 返回
    /// * `u64` - 新代数
    pub async fn publish(&self, vars: Vec<String>) -> u64 {
        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.generation() + 1;
            *state = Snapshot::new(generation, vars);
            generation
        };

        self.notify.notify_waiters();
        generation
    }

    /// 把每个新代数写入 `watch` 通道，直到接收端全部关闭或发布器关闭
    ///
    /// 消费者阻塞时中间代数会被覆盖，但最新的一代始终可见。
    pub async fn forward(&self, sender: watch::Sender<Snapshot>) {
        let mut last_seen = sender.borrow().generation();

        loop {
            let result = tokio::select! {
                _ = sender.closed() => {
                    debug!("通知通道的接收端已全部关闭，停止转发");
                    return;
                }
                result = self.next(&self.shutdown, last_seen) => result,
            };

            match result {
                Ok(snapshot) => {
                    last_seen = snapshot.generation();
                    trace!("转发快照，代数: {}", last_seen);
                    sender.send_replace(snapshot);
                }
                Err(e) => {
                    debug!("停止快照转发: {}", e);
                    return;
                }
            }
        }
    }
}
