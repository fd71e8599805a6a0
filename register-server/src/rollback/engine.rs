//! RollbackEngine — 从账本重建某 key 在过去时刻的记录集
//!
//! 重建分两阶段：
//! 1. remove — time point 之后才创建的 record 整体删除
//! 2. restore — time point 之后被改过/删过的 record 恢复到
//!    time point 时刻的快照
//!
//! 两阶段都走正常的 record 操作，因此会照常产生 history 行和
//! outbox 条目 (带回滚溯源 meta)。两阶段每次都从账本重新计算，
//! 所以重复执行是幂等的；但跨整个操作**不是**原子的 — 中途失败
//! 已生效的删除/恢复不会被撤销。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use super::store::RollbackStore;
use super::types::{
    RollbackDetails, RollbackRecord, RollbackRecordOptions, RollbackStatus, StartRollback,
};
use crate::db::models::{History, Operation, Record, RecordCreate};
use crate::db::repository::{HistoryRepository, RecordRepository};
use crate::utils::time::{format_time_point, parse_time_point, validate_retention};
use crate::utils::{AppError, AppResult, now_millis};

/// 重建计划 — 纯函数计算，便于单测
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RollbackPlan {
    /// time point 时不存在的 record (之后的行只有 create)
    pub to_remove: Vec<String>,
    /// time point 之后被 update/delete 过的 record (去重，不含 to_remove)
    pub to_restore: Vec<String>,
}

/// 从 time point 之后的账本行 (newest-first) 计算重建计划
pub(crate) fn compute_plan(rows_after: &[History]) -> RollbackPlan {
    let mut first_seen: Vec<String> = Vec::new();
    let mut mutated: HashMap<String, bool> = HashMap::new();

    for row in rows_after {
        let entry = mutated.entry(row.record_id.clone()).or_insert_with(|| {
            first_seen.push(row.record_id.clone());
            false
        });
        if row.operation != Operation::Create {
            *entry = true;
        }
    }

    let mut plan = RollbackPlan::default();
    for record_id in first_seen {
        if mutated[&record_id] {
            plan.to_restore.push(record_id);
        } else {
            plan.to_remove.push(record_id);
        }
    }
    plan
}

#[derive(Clone)]
pub struct RollbackEngine {
    history: HistoryRepository,
    records: RecordRepository,
    store: Arc<dyn RollbackStore>,
    retention_days: u32,
}

impl RollbackEngine {
    pub fn new(
        history: HistoryRepository,
        records: RecordRepository,
        store: Arc<dyn RollbackStore>,
        retention_days: u32,
    ) -> Self {
        Self {
            history,
            records,
            store,
            retention_days,
        }
    }

    /// 启动一次回滚，立即返回 rollback id
    ///
    /// 校验全部在这里同步完成；重建本身 detached 运行，
    /// 进度和失败只能通过 [`check_rollback_status_with_details`] 轮询观察。
    ///
    /// [`check_rollback_status_with_details`]: RollbackEngine::check_rollback_status_with_details
    pub async fn start_rollback(&self, options: StartRollback, person: &str) -> AppResult<String> {
        if options.key_id.trim().is_empty() {
            return Err(AppError::validation("keyId is required"));
        }
        let time_point = parse_time_point(&options.time_point)?;
        validate_retention(time_point, self.retention_days)?;

        // 同 key 最多一个进行中的回滚：store 侧原子登记，
        // 并发的 start 调用不存在检查/写入窗口 (跨副本互斥见 store 文档)
        let rollback_id = Uuid::new_v4().to_string();
        if let Some(active) = self
            .store
            .try_begin(RollbackRecord {
                id: rollback_id.clone(),
                key_id: options.key_id.clone(),
                time_point,
                status: RollbackStatus::Rollbacking,
                details: RollbackDetails::default(),
                started_by: person.to_string(),
                created_at: now_millis(),
            })
            .await?
        {
            return Err(AppError::conflict(format!(
                "Rollback {} is already in progress for key {}",
                active.id, options.key_id
            )));
        }

        tracing::info!(
            rollback_id = %rollback_id,
            key_id = %options.key_id,
            time_point = %format_time_point(time_point),
            "Rollback started"
        );

        let engine = self.clone();
        let id = rollback_id.clone();
        let key_id = options.key_id;
        let person = person.to_string();
        tokio::spawn(async move {
            engine.run(id, key_id, time_point, person).await;
        });

        Ok(rollback_id)
    }

    /// 查询回滚状态与进度
    pub async fn check_rollback_status_with_details(
        &self,
        rollback_id: &str,
    ) -> AppResult<RollbackRecord> {
        self.store
            .get(rollback_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Rollback {rollback_id}")))
    }

    /// 按显式 history 行恢复单个 record，绕过 time point 扫描
    ///
    /// 与 restore 阶段相同的 snapshot-and-reapply 语义，同步执行。
    pub async fn rollback_record(
        &self,
        options: RollbackRecordOptions,
        person: &str,
    ) -> AppResult<Record> {
        let row = self
            .history
            .find_by_id(&options.history_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("History row {}", options.history_id)))?;

        if row.record_id != options.record_id || row.key_id != options.key_id {
            return Err(AppError::validation(format!(
                "History row {} does not belong to record {} in key {}",
                options.history_id, options.record_id, options.key_id
            )));
        }

        let provenance = json!({
            "rollback": { "history_id": options.history_id }
        });

        let restored = if self.records.find_by_id(&row.record_id).await?.is_some() {
            self.records
                .update_from_snapshot(&row.record_id, &row.data, person, Some(provenance))
                .await?
        } else {
            self.records
                .create(
                    snapshot_create(&row.record_id, &row),
                    person,
                    Some(provenance),
                )
                .await?
        };
        Ok(restored)
    }

    /// detached 的重建执行体 — 错误只落到 store，不向外抛
    async fn run(self, rollback_id: String, key_id: String, time_point: i64, person: String) {
        let result = self
            .reconstruct(&rollback_id, &key_id, time_point, &person)
            .await;

        let (status, error) = match result {
            Ok(()) => (RollbackStatus::Rollbacked, None),
            Err(e) => {
                tracing::error!(rollback_id = %rollback_id, key_id = %key_id, "Rollback failed: {e}");
                (RollbackStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .finish(&rollback_id, status, error)
            .await
        {
            tracing::error!(rollback_id = %rollback_id, "Failed to record rollback outcome: {e}");
        } else if status == RollbackStatus::Rollbacked {
            tracing::info!(rollback_id = %rollback_id, key_id = %key_id, "Rollback complete");
        }
    }

    async fn reconstruct(
        &self,
        rollback_id: &str,
        key_id: &str,
        time_point: i64,
        person: &str,
    ) -> AppResult<()> {
        // 1. time point 之后的全部账本行，newest-first
        let rows = self
            .history
            .find_all_by_key_id(key_id, Some(time_point))
            .await?;
        let plan = compute_plan(&rows);

        self.update_details(rollback_id, |d| {
            d.history_rows_to_processing = rows.len() as u64;
        })
        .await?;

        let provenance = json!({
            "rollback": {
                "id": rollback_id,
                "time_point": format_time_point(time_point),
            }
        });

        // 2. remove 阶段 — time point 时不存在的 record
        for record_id in &plan.to_remove {
            self.records
                .delete(record_id, person, Some(provenance.clone()))
                .await?;
            self.update_details(rollback_id, |d| d.removed_records_count += 1)
                .await?;
        }

        // 3. restore 阶段 — 严格串行，保持账本顺序
        for record_id in &plan.to_restore {
            self.restore_to(record_id, time_point, person, &provenance)
                .await?;
            self.update_details(rollback_id, |d| d.restored_records_count += 1)
                .await?;
        }

        Ok(())
    }

    /// 把单个 record 恢复到 time point 时刻的状态
    async fn restore_to(
        &self,
        record_id: &str,
        time_point: i64,
        person: &str,
        provenance: &Value,
    ) -> AppResult<()> {
        let snapshot_row = self
            .history
            .latest_for_record_at(record_id, time_point)
            .await?;
        let exists = self.records.find_by_id(record_id).await?.is_some();

        match snapshot_row {
            // time point 时存在 → 恢复快照 (更新或按原 id 重建)
            Some(row) if row.operation != Operation::Delete => {
                if exists {
                    self.records
                        .update_from_snapshot(record_id, &row.data, person, Some(provenance.clone()))
                        .await?;
                } else {
                    self.records
                        .create(
                            snapshot_create(record_id, &row),
                            person,
                            Some(provenance.clone()),
                        )
                        .await?;
                }
            }
            // time point 时不存在 (没有行，或最新行是 delete)
            _ => {
                if exists {
                    self.records
                        .delete(record_id, person, Some(provenance.clone()))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn update_details(
        &self,
        rollback_id: &str,
        mutate: impl FnOnce(&mut RollbackDetails),
    ) -> AppResult<()> {
        let mut record = self
            .store
            .get(rollback_id)
            .await?
            .ok_or_else(|| AppError::internal(format!("Rollback {rollback_id} vanished")))?;
        mutate(&mut record.details);
        self.store.put(record).await
    }

    async fn finish(
        &self,
        rollback_id: &str,
        status: RollbackStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        let mut record = self
            .store
            .get(rollback_id)
            .await?
            .ok_or_else(|| AppError::internal(format!("Rollback {rollback_id} vanished")))?;
        record.status = status;
        record.details.error = error;
        self.store.put(record).await
    }
}

/// 从 history 行构造保留原 id 的重建请求
fn snapshot_create(record_id: &str, row: &History) -> RecordCreate {
    let snapshot = &row.data;
    RecordCreate {
        id: Some(record_id.to_string()),
        register_id: snapshot.register_id.clone(),
        key_id: snapshot.key_id.clone(),
        data: snapshot.data.clone(),
        meta: Some(snapshot.meta.clone()),
        allow_tokens: Some(snapshot.allow_tokens.clone()),
        search_string: snapshot.search_string.clone(),
        signature: snapshot.signature.clone(),
        is_encrypted: Some(snapshot.is_encrypted),
    }
}
