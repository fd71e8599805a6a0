//! Reindexer — 索引全量重建
//!
//! drop + recreate 索引，然后把 key 的全部当前 record 经
//! `reindex_add` 重灌。重建期间 key 被登记在 running set 里，
//! reconciler 据此把该 key 报告为 in_progress。

use std::sync::Arc;

use dashmap::DashMap;

use super::elastic::ElasticTarget;
use crate::db::models::Key;
use crate::db::repository::RecordRepository;
use crate::utils::{AppError, AppResult, now_millis};

#[derive(Clone)]
pub struct Reindexer {
    records: RecordRepository,
    elastic: ElasticTarget,
    /// key_id → 重建开始时间 (millis)
    running: Arc<DashMap<String, i64>>,
}

impl Reindexer {
    pub fn new(records: RecordRepository, elastic: ElasticTarget) -> Self {
        Self {
            records,
            elastic,
            running: Arc::new(DashMap::new()),
        }
    }

    /// 某 key 是否正在重建
    pub fn is_running(&self, key_id: &str) -> bool {
        self.running.contains_key(key_id)
    }

    /// 重建某 key 的索引，返回重灌的文档数
    ///
    /// 同一 key 不允许并发重建。running set 的登记在任何退出路径
    /// 都会清除。
    pub async fn reindex_key(&self, key: &Key) -> AppResult<u64> {
        let key_id = key.key();
        if self.running.insert(key_id.clone(), now_millis()).is_some() {
            return Err(AppError::conflict(format!(
                "Reindex already running for key {key_id}"
            )));
        }

        let result = self.run(key, &key_id).await;
        self.running.remove(&key_id);

        match &result {
            Ok(count) => {
                tracing::info!(key_id = %key_id, documents = count, "Reindex complete");
            }
            Err(e) => {
                tracing::error!(key_id = %key_id, "Reindex failed: {e}");
            }
        }
        result
    }

    async fn run(&self, key: &Key, key_id: &str) -> AppResult<u64> {
        self.elastic.reindex_reset(key).await?;

        let records = self.records.find_all_by_key_id(key_id).await?;
        let mut added = 0u64;
        for record in &records {
            self.elastic.reindex_add(record).await?;
            added += 1;
        }
        Ok(added)
    }
}
