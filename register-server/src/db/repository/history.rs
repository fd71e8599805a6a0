//! History Repository
//!
//! 账本只增不改：本仓库仅提供读取接口，写入发生在
//! `RecordRepository` 的变更事务内。

use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

use super::{BaseRepository, CountResult, Page, RepoResult};
use crate::db::models::{History, Operation};

const TABLE: &str = "history";

/// 全量扫描的内部分块大小
const SCAN_CHUNK: usize = 100_000;

#[derive(Clone)]
pub struct HistoryRepository {
    base: BaseRepository,
}

impl HistoryRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find one history row by its record link
    pub async fn find_by_link(&self, link: &RecordId) -> RepoResult<Option<History>> {
        let row: Option<History> = self.base.db().select(link.clone()).await?;
        Ok(row)
    }

    /// Find one history row by pure id
    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<History>> {
        let row: Option<History> = self.base.db().select((TABLE, id)).await?;
        Ok(row)
    }

    /// 按 key 分页查询，newest-first，可按操作类型过滤
    pub async fn find_by_key_id(
        &self,
        key_id: &str,
        page: Page,
        operation: Option<Operation>,
    ) -> RepoResult<(Vec<History>, u64)> {
        self.find_paginated("key_id", key_id, page, operation).await
    }

    /// 按 record 分页查询，newest-first，可按操作类型过滤
    pub async fn find_by_record_id(
        &self,
        record_id: &str,
        page: Page,
        operation: Option<Operation>,
    ) -> RepoResult<(Vec<History>, u64)> {
        self.find_paginated("record_id", record_id, page, operation)
            .await
    }

    async fn find_paginated(
        &self,
        field: &'static str,
        value: &str,
        page: Page,
        operation: Option<Operation>,
    ) -> RepoResult<(Vec<History>, u64)> {
        let mut where_clause = format!("{field} = $value");
        if operation.is_some() {
            where_clause.push_str(" AND operation = $operation");
        }

        let sql = format!(
            "SELECT count() as total FROM history WHERE {where_clause} GROUP ALL; \
             SELECT * FROM history WHERE {where_clause} \
             ORDER BY created_at DESC, id DESC LIMIT {} START {}",
            page.limit, page.offset
        );

        let mut qb = self
            .base
            .db()
            .query(&sql)
            .bind(("value", value.to_string()));
        if let Some(op) = operation {
            qb = qb.bind(("operation", op.to_string()));
        }
        let mut result = qb.await?;

        let count: Vec<CountResult> = result.take(0)?;
        let total = count.first().map(|c| c.total).unwrap_or(0);
        let rows: Vec<History> = result.take(1)?;

        Ok((rows, total))
    }

    /// 某 key 的全量账本扫描，newest-first，内部按 100k 行分块
    ///
    /// 仅供回滚重建使用；`created_after` 限定 `created_at > t` 的行。
    pub async fn find_all_by_key_id(
        &self,
        key_id: &str,
        created_after: Option<i64>,
    ) -> RepoResult<Vec<History>> {
        let mut where_clause = "key_id = $key".to_string();
        if created_after.is_some() {
            where_clause.push_str(" AND created_at > $after");
        }

        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let sql = format!(
                "SELECT * FROM history WHERE {where_clause} \
                 ORDER BY created_at DESC, id DESC LIMIT {SCAN_CHUNK} START {offset}"
            );
            let mut qb = self
                .base
                .db()
                .query(&sql)
                .bind(("key", key_id.to_string()));
            if let Some(after) = created_after {
                qb = qb.bind(("after", after));
            }
            let chunk: Vec<History> = qb.await?.take(0)?;
            let fetched = chunk.len();
            rows.extend(chunk);

            if fetched < SCAN_CHUNK {
                break;
            }
            offset += SCAN_CHUNK;
        }
        Ok(rows)
    }

    /// 某 record 在时刻 `at` 之前 (含) 的最新一行 — 回滚恢复的快照来源
    pub async fn latest_for_record_at(
        &self,
        record_id: &str,
        at: i64,
    ) -> RepoResult<Option<History>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT * FROM history WHERE record_id = $record AND created_at <= $at \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(("record", record_id.to_string()))
            .bind(("at", at))
            .await?;
        let rows: Vec<History> = result.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// 某 record 的最新一行 (afterhandler 创建时的共享查找)
    pub async fn latest_for_record(&self, record_id: &str) -> RepoResult<Option<History>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT * FROM history WHERE record_id = $record \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(("record", record_id.to_string()))
            .await?;
        let rows: Vec<History> = result.take(0)?;
        Ok(rows.into_iter().next())
    }
}
