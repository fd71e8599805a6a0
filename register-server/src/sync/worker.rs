//! SyncWorker — background worker that drains the afterhandler outbox
//!
//! 每个注册的同步目标类型恰好一个 worker 任务 (single-flight per type)，
//! 严格 oldest-first 抽取，保证同一 key 的写入不会乱序到达外部索引。
//! at-least-once：条目先处理后标记，进程崩溃时最多重复投递，不会丢失。

use std::sync::Arc;

use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::target::SyncTarget;
use crate::db::models::Afterhandler;
use crate::db::repository::{AfterhandlerRepository, HistoryRepository};

pub struct SyncWorker {
    afterhandlers: AfterhandlerRepository,
    history: HistoryRepository,
    target: Arc<dyn SyncTarget>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        afterhandlers: AfterhandlerRepository,
        history: HistoryRepository,
        target: Arc<dyn SyncTarget>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            afterhandlers,
            history,
            target,
            poll_interval,
            shutdown,
        }
    }

    /// Run the drain loop
    ///
    /// 队列空时按 poll_interval 轮询；每轮把当前积压排空。
    pub async fn run(self) {
        let kind = self.target.kind();
        tracing::info!(target_type = %kind, "SyncWorker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(target_type = %kind, "SyncWorker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.drain_backlog().await;
                }
            }
        }

        tracing::info!(target_type = %kind, "SyncWorker stopped");
    }

    /// 排空当前积压，直到没有待处理条目
    ///
    /// 单条失败只影响该条目 (标记 has_error 后继续)；
    /// 标记本身失败时中止本轮，避免对同一条目热循环。
    pub async fn drain_backlog(&self) {
        let kind = self.target.kind();
        loop {
            let entry = match self.afterhandlers.next_pending(kind).await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(target_type = %kind, "Failed to fetch pending afterhandler: {e}");
                    break;
                }
            };

            let outcome = self.process(&entry).await;

            let marked = match outcome {
                Ok(()) => self.afterhandlers.set_synced(&entry.key()).await,
                Err(message) => {
                    tracing::warn!(
                        target_type = %kind,
                        afterhandler_id = %entry.key(),
                        error = %message,
                        "Afterhandler processing failed, marking as permanently failed"
                    );
                    self.afterhandlers
                        .set_synced_with_error(&entry.key(), &message)
                        .await
                }
            };

            if let Err(e) = marked {
                tracing::error!(
                    target_type = %kind,
                    afterhandler_id = %entry.key(),
                    "Failed to mark afterhandler, aborting drain round: {e}"
                );
                break;
            }
        }
    }

    /// 处理单个条目：加载 history 行并交给目标
    async fn process(&self, entry: &Afterhandler) -> Result<(), String> {
        let history = self
            .history
            .find_by_link(&entry.history_id)
            .await
            .map_err(|e| format!("Failed to load history row: {e}"))?
            .ok_or_else(|| format!("History row {} missing", entry.history_id))?;

        let handled = self
            .target
            .handle(&history)
            .await
            .map_err(|e| e.to_string())?;

        tracing::debug!(
            target_type = %self.target.kind(),
            afterhandler_id = %entry.key(),
            operation = %history.operation,
            record_id = %history.record_id,
            handled,
            "Afterhandler drained"
        );
        Ok(())
    }
}
