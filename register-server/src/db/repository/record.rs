//! Record Repository
//!
//! Record 变更的唯一入口。每次 create/update/delete 在**同一事务**内
//! 写入 record 行和对应的 history 行，随后为 key 上启用的每个同步目标
//! 创建 outbox 条目。账本的完整性不依赖任何数据库触发器。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use uuid::Uuid;

use super::{AfterhandlerRepository, BaseRepository, CountResult, KeyRepository, RepoError, RepoResult};
use crate::db::models::{Afterhandler, Key, Operation, Record, RecordCreate, RecordSnapshot, RecordUpdate};
use crate::utils::now_millis;

const TABLE: &str = "record";

/// reindex 扫描的分块大小
const SCAN_CHUNK: usize = 1_000;

/// history 行的进程内单调序列
///
/// 账本按 (created_at, id) 排序，created_at 是毫秒；同一毫秒内的
/// 多次变更必须由 id 定序。嵌入式库只有本进程写入，固定宽度的
/// `{millis}-{seq}` id 按字典序即按写入序。
static HISTORY_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_history_id(created_at: i64) -> String {
    let seq = HISTORY_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{created_at:013}-{seq:016}")
}

/// history 插入用结构 (不含 SurrealDB id)
#[derive(Debug, Serialize)]
struct HistoryInsert {
    record_id: String,
    register_id: String,
    key_id: String,
    operation: Operation,
    data: RecordSnapshot,
    person: String,
    created_by: String,
    updated_by: String,
    meta: Value,
    created_at: i64,
}

#[derive(Clone)]
pub struct RecordRepository {
    base: BaseRepository,
    keys: KeyRepository,
    afterhandlers: AfterhandlerRepository,
    /// 静态 per-key 同步目标配置 (与 key.meta.afterhandlers 取并集)
    key_afterhandlers: HashMap<String, Vec<String>>,
}

impl RecordRepository {
    pub fn new(db: Surreal<Db>, key_afterhandlers: HashMap<String, Vec<String>>) -> Self {
        Self {
            keys: KeyRepository::new(db.clone()),
            afterhandlers: AfterhandlerRepository::new(db.clone()),
            base: BaseRepository::new(db),
            key_afterhandlers,
        }
    }

    /// Find record by id
    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Record>> {
        let record: Option<Record> = self.base.db().select((TABLE, id)).await?;
        Ok(record)
    }

    /// 某 key 的当前 record 数 (reconciler 的 `total` 输入)
    pub async fn count_by_key_id(&self, key_id: &str) -> RepoResult<u64> {
        let mut result = self
            .base
            .db()
            .query("SELECT count() as total FROM record WHERE key_id = $key GROUP ALL")
            .bind(("key", key_id.to_string()))
            .await?;
        let count: Vec<CountResult> = result.take(0)?;
        Ok(count.first().map(|c| c.total).unwrap_or(0))
    }

    /// 某 key 的全部 record (分块扫描，reindex 重灌用)
    pub async fn find_all_by_key_id(&self, key_id: &str) -> RepoResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset = 0usize;
        loop {
            let sql = format!(
                "SELECT * FROM record WHERE key_id = $key \
                 ORDER BY created_at ASC, id ASC LIMIT {SCAN_CHUNK} START {offset}"
            );
            let chunk: Vec<Record> = self
                .base
                .db()
                .query(&sql)
                .bind(("key", key_id.to_string()))
                .await?
                .take(0)?;
            let fetched = chunk.len();
            records.extend(chunk);

            if fetched < SCAN_CHUNK {
                break;
            }
            offset += SCAN_CHUNK;
        }
        Ok(records)
    }

    /// Create a new record
    ///
    /// `data.id` 允许预设 (回滚重建保留原 id)。`history_meta` 附加到
    /// history 行的 meta 字段 (回滚溯源标记)。
    pub async fn create(
        &self,
        data: RecordCreate,
        person: &str,
        history_meta: Option<Value>,
    ) -> RepoResult<Record> {
        let key = self.require_key(&data.key_id).await?;

        let id = data.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.find_by_id(&id).await?.is_some() {
            return Err(RepoError::Duplicate(format!("Record {id} already exists")));
        }

        let now = now_millis();
        let snapshot = RecordSnapshot {
            register_id: data.register_id,
            key_id: data.key_id,
            data: data.data,
            meta: data.meta.unwrap_or_else(|| Value::Object(Default::default())),
            allow_tokens: data.allow_tokens.unwrap_or_default(),
            search_string: data.search_string,
            signature: data.signature,
            is_encrypted: data.is_encrypted.unwrap_or(false),
            created_by: person.to_string(),
            updated_by: person.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.mutate(&id, Operation::Create, &snapshot, person, history_meta)
            .await?;
        self.fan_out(&id, &key).await?;

        self.find_by_id(&id)
            .await?
            .ok_or_else(|| RepoError::Database(format!("Record {id} missing after create")))
    }

    /// Update a record (merge semantics, `None` keeps the current value)
    pub async fn update(
        &self,
        id: &str,
        data: RecordUpdate,
        person: &str,
        history_meta: Option<Value>,
    ) -> RepoResult<Record> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Record {id} not found")))?;
        let key = self.require_key(&existing.key_id).await?;

        let mut snapshot = existing.snapshot();
        if let Some(value) = data.data {
            snapshot.data = value;
        }
        if let Some(meta) = data.meta {
            snapshot.meta = meta;
        }
        if let Some(tokens) = data.allow_tokens {
            snapshot.allow_tokens = tokens;
        }
        if let Some(search) = data.search_string {
            snapshot.search_string = Some(search);
        }
        if let Some(signature) = data.signature {
            snapshot.signature = Some(signature);
        }
        snapshot.updated_by = person.to_string();
        snapshot.updated_at = now_millis();

        self.mutate(id, Operation::Update, &snapshot, person, history_meta)
            .await?;
        self.fan_out(id, &key).await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Record {id} missing after update")))
    }

    /// 将 record 整体覆盖为给定历史快照 (回滚恢复路径)
    ///
    /// 与 [`update`] 不同，快照中为 `None` 的 search_string/signature
    /// 会清空当前值而不是保留。
    pub async fn update_from_snapshot(
        &self,
        id: &str,
        from: &RecordSnapshot,
        person: &str,
        history_meta: Option<Value>,
    ) -> RepoResult<Record> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Record {id} not found")))?;
        let key = self.require_key(&from.key_id).await?;

        let mut snapshot = from.clone();
        snapshot.updated_by = person.to_string();
        snapshot.updated_at = now_millis();

        self.mutate(id, Operation::Update, &snapshot, person, history_meta)
            .await?;
        self.fan_out(id, &key).await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Record {id} missing after restore")))
    }

    /// Delete a record
    ///
    /// history 行的 data 是删除**之前**的状态。
    pub async fn delete(
        &self,
        id: &str,
        person: &str,
        history_meta: Option<Value>,
    ) -> RepoResult<()> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Record {id} not found")))?;
        let key = self.require_key(&existing.key_id).await?;

        let snapshot = existing.snapshot();
        self.mutate(id, Operation::Delete, &snapshot, person, history_meta)
            .await?;
        self.fan_out(id, &key).await?;
        Ok(())
    }

    async fn require_key(&self, key_id: &str) -> RepoResult<Key> {
        self.keys
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Key {key_id} not found")))
    }

    /// record 变更 + history 追加，单事务
    async fn mutate(
        &self,
        id: &str,
        operation: Operation,
        snapshot: &RecordSnapshot,
        person: &str,
        history_meta: Option<Value>,
    ) -> RepoResult<()> {
        let record_stmt = match operation {
            Operation::Create => "CREATE type::thing('record', $id) CONTENT $snapshot;",
            Operation::Update => "UPDATE type::thing('record', $id) CONTENT $snapshot;",
            Operation::Delete => "DELETE type::thing('record', $id);",
        };
        let sql = format!(
            "BEGIN TRANSACTION; \
             {record_stmt} \
             CREATE type::thing('history', $history_id) CONTENT $history; \
             COMMIT TRANSACTION;"
        );

        let created_at = now_millis();
        let history = HistoryInsert {
            record_id: id.to_string(),
            register_id: snapshot.register_id.clone(),
            key_id: snapshot.key_id.clone(),
            operation,
            data: snapshot.clone(),
            person: person.to_string(),
            created_by: snapshot.created_by.clone(),
            updated_by: snapshot.updated_by.clone(),
            meta: history_meta.unwrap_or_else(|| Value::Object(Default::default())),
            created_at,
        };

        self.base
            .db()
            .query(&sql)
            .bind(("id", id.to_string()))
            .bind(("snapshot", snapshot.clone()))
            .bind(("history_id", next_history_id(created_at)))
            .bind(("history", history))
            .await?
            .check()?;
        Ok(())
    }

    /// 为刚写入的 history 行创建 outbox 条目
    async fn fan_out(&self, record_id: &str, key: &Key) -> RepoResult<Vec<Afterhandler>> {
        let enabled = key.enabled_targets(&self.key_afterhandlers);
        self.afterhandlers
            .create_for_record(record_id, &enabled)
            .await
    }

    /// 访问内部的 afterhandler 仓库
    pub fn afterhandlers(&self) -> &AfterhandlerRepository {
        &self.afterhandlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_ids_are_monotonic_within_a_millisecond() {
        let t = 1_700_000_000_000;
        let a = next_history_id(t);
        let b = next_history_id(t);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn history_ids_order_across_milliseconds() {
        let a = next_history_id(1_700_000_000_000);
        let b = next_history_id(1_700_000_000_001);
        assert!(a < b);
    }
}
