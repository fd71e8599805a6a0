//! Afterhandler Repository (outbox)

use serde::Serialize;
use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use uuid::Uuid;

use super::{BaseRepository, CountResult, RepoError, RepoResult};
use crate::db::models::{Afterhandler, AfterhandlerType};
use crate::utils::now_millis;

const TABLE: &str = "afterhandler";

/// 插入用结构 (不含 SurrealDB id)
#[derive(Debug, Serialize)]
struct AfterhandlerInsert {
    #[serde(rename = "type")]
    kind: AfterhandlerType,
    history_id: RecordId,
    synced: bool,
    has_error: bool,
    error_message: Option<String>,
    created_at: i64,
}

#[derive(Clone)]
pub struct AfterhandlerRepository {
    base: BaseRepository,
}

impl AfterhandlerRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// 为一次 record 变更创建 outbox 条目
    ///
    /// 查找该 record 刚写入的 history 行 (一次查找，各类型共享)，
    /// 为每个启用的同步目标插入一条 `synced=false` 的 afterhandler。
    /// 没有启用任何目标时不产生任何行。
    pub async fn create_for_record(
        &self,
        record_id: &str,
        types: &[AfterhandlerType],
    ) -> RepoResult<Vec<Afterhandler>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let history = super::HistoryRepository::new(self.base.db().clone())
            .latest_for_record(record_id)
            .await?
            .ok_or_else(|| {
                RepoError::Database(format!("No history row found for record {record_id}"))
            })?;
        let history_id = history
            .id
            .clone()
            .ok_or_else(|| RepoError::Database("History row has no id".to_string()))?;

        let mut created = Vec::with_capacity(types.len());
        for kind in types {
            let insert = AfterhandlerInsert {
                kind: *kind,
                history_id: history_id.clone(),
                synced: false,
                has_error: false,
                error_message: None,
                created_at: now_millis(),
            };
            let id = Uuid::new_v4().to_string();
            let row: Option<Afterhandler> = self
                .base
                .db()
                .create((TABLE, id))
                .content(insert)
                .await?;
            created.push(row.ok_or_else(|| {
                RepoError::Database("Failed to create afterhandler".to_string())
            })?);
        }
        Ok(created)
    }

    /// 最旧的待处理条目 (oldest-first 抽取顺序由此保证)
    pub async fn next_pending(&self, kind: AfterhandlerType) -> RepoResult<Option<Afterhandler>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT * FROM afterhandler WHERE type = $type AND synced = false \
                 ORDER BY created_at ASC, id ASC LIMIT 1",
            )
            .bind(("type", kind))
            .await?;
        let rows: Vec<Afterhandler> = result.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// 标记为已送达 (终态)
    pub async fn set_synced(&self, id: &str) -> RepoResult<()> {
        self.base
            .db()
            .query("UPDATE $thing SET synced = true, has_error = false")
            .bind(("thing", RecordId::from_table_key(TABLE, id)))
            .await?;
        Ok(())
    }

    /// 标记为永久失败 (终态，不自动重试；恢复是人工操作)
    pub async fn set_synced_with_error(&self, id: &str, message: &str) -> RepoResult<()> {
        self.base
            .db()
            .query(
                "UPDATE $thing SET synced = true, has_error = true, error_message = $message",
            )
            .bind(("thing", RecordId::from_table_key(TABLE, id)))
            .bind(("message", message.to_string()))
            .await?;
        Ok(())
    }

    /// 某 key 仍待处理的条目数 (通过 history 链接归属 key)
    pub async fn count_pending_by_key(
        &self,
        kind: AfterhandlerType,
        key_id: &str,
    ) -> RepoResult<u64> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT count() as total FROM afterhandler \
                 WHERE type = $type AND synced = false AND history_id.key_id = $key GROUP ALL",
            )
            .bind(("type", kind))
            .bind(("key", key_id.to_string()))
            .await?;
        let count: Vec<CountResult> = result.take(0)?;
        Ok(count.first().map(|c| c.total).unwrap_or(0))
    }

    /// 某类型的全部待处理条目数
    pub async fn count_pending(&self, kind: AfterhandlerType) -> RepoResult<u64> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT count() as total FROM afterhandler \
                 WHERE type = $type AND synced = false GROUP ALL",
            )
            .bind(("type", kind))
            .await?;
        let count: Vec<CountResult> = result.take(0)?;
        Ok(count.first().map(|c| c.total).unwrap_or(0))
    }

    /// 某 history 行的全部 outbox 条目 (诊断/测试用)
    pub async fn find_by_history(&self, history_id: &RecordId) -> RepoResult<Vec<Afterhandler>> {
        let rows: Vec<Afterhandler> = self
            .base
            .db()
            .query("SELECT * FROM afterhandler WHERE history_id = $history ORDER BY created_at ASC")
            .bind(("history", history_id.clone()))
            .await?
            .take(0)?;
        Ok(rows)
    }
}
