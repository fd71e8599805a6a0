//! SyncReconciler — 只读的 per-key 同步状态分类器
//!
//! 不持久化任何状态，每次评估独立对比三路计数：
//! DB record 数、outbox 积压、外部索引计数。
//! 判定顺序是承载语义的：先区分"索引不存在" (重建中) 和其它失败，
//! 再看积压，最后才比对计数 — 否则合法的重建期会被误判成
//! synced 或 error。

use std::collections::HashMap;

use serde::Serialize;

use super::elastic::{CountError, ElasticTarget};
use super::reindex::Reindexer;
use crate::db::models::AfterhandlerType;
use crate::db::repository::{AfterhandlerRepository, KeyRepository, RecordRepository};
use crate::utils::{AppError, AppResult};

/// Per-key 同步状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "message")]
pub enum SyncStatus {
    /// 该 key 未启用此同步目标
    Inactive,
    /// 重建中或仍有积压 — 正在收敛
    InProgress,
    /// DB 与索引一致且无积压
    Synced,
    /// 计数失败或计数不一致 (卡死状态)
    Error(String),
    /// 评估过程本身异常
    Unknown,
}

/// 判定逻辑 (first match wins)
///
/// 1. 未启用 → inactive
/// 2. 计数失败: 索引不存在 → in_progress (索引还在重建)
/// 3. 计数失败: 其它 → error
/// 4. 重建进行中或积压 > 0 → in_progress
/// 5. 计数一致且无积压 → synced
/// 6. 其余 → error
fn classify(
    enabled: bool,
    reindex_running: bool,
    queue_length: u64,
    total: u64,
    index_count: Result<u64, CountError>,
) -> SyncStatus {
    if !enabled {
        return SyncStatus::Inactive;
    }

    let count = match index_count {
        Err(CountError::IndexNotFound) => return SyncStatus::InProgress,
        Err(CountError::Other(reason)) => return SyncStatus::Error(reason),
        Ok(count) => count,
    };

    if reindex_running || queue_length > 0 {
        return SyncStatus::InProgress;
    }
    if total == count {
        return SyncStatus::Synced;
    }
    SyncStatus::Error(format!(
        "Record count {total} does not match index count {count} with an empty queue"
    ))
}

/// 同步状态评估服务
#[derive(Clone)]
pub struct SyncReconciler {
    keys: KeyRepository,
    records: RecordRepository,
    afterhandlers: AfterhandlerRepository,
    elastic: ElasticTarget,
    reindexer: Reindexer,
    key_afterhandlers: HashMap<String, Vec<String>>,
}

impl SyncReconciler {
    pub fn new(
        keys: KeyRepository,
        records: RecordRepository,
        afterhandlers: AfterhandlerRepository,
        elastic: ElasticTarget,
        reindexer: Reindexer,
        key_afterhandlers: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            keys,
            records,
            afterhandlers,
            elastic,
            reindexer,
            key_afterhandlers,
        }
    }

    /// 评估某 key 的搜索索引同步状态
    ///
    /// 任何评估异常都折叠为 `unknown`，不向上传播。
    pub async fn status(&self, key_id: &str) -> SyncStatus {
        match self.evaluate(key_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(key_id = %key_id, "Sync status evaluation failed: {e}");
                SyncStatus::Unknown
            }
        }
    }

    async fn evaluate(&self, key_id: &str) -> AppResult<SyncStatus> {
        let key = self
            .keys
            .find_by_id(key_id)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Key {key_id}")))?;

        let enabled = key
            .enabled_targets(&self.key_afterhandlers)
            .contains(&AfterhandlerType::Elastic);
        if !enabled {
            return Ok(SyncStatus::Inactive);
        }

        let total = self.records.count_by_key_id(key_id).await?;
        let queue_length = self
            .afterhandlers
            .count_pending_by_key(AfterhandlerType::Elastic, key_id)
            .await?;
        let index_count = self.elastic.index_count(key_id).await;
        let reindex_running = self.reindexer.is_running(key_id);

        Ok(classify(true, reindex_running, queue_length, total, index_count))
    }
}
