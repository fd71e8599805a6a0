//! 回滚引擎集成测试 (内存 SurrealDB)
//! Run: cargo test -p register-server --test rollback_engine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use register_server::db::DbService;
use register_server::db::models::{KeyCreate, KeyMeta, Operation, RecordCreate, RecordUpdate};
use register_server::db::repository::{HistoryRepository, KeyRepository, Page, RecordRepository};
use register_server::rollback::{
    InMemoryRollbackStore, RollbackDetails, RollbackEngine, RollbackRecord, RollbackRecordOptions,
    RollbackStatus, RollbackStore, StartRollback,
};
use register_server::utils::time::format_time_point;
use register_server::utils::{AppError, now_millis};

struct Fixture {
    keys: KeyRepository,
    records: RecordRepository,
    history: HistoryRepository,
    store: Arc<dyn RollbackStore>,
    engine: RollbackEngine,
}

async fn setup() -> Fixture {
    let db = DbService::memory().await.unwrap();
    let keys = KeyRepository::new(db.clone());
    let records = RecordRepository::new(db.clone(), HashMap::new());
    let history = HistoryRepository::new(db.clone());
    let store: Arc<dyn RollbackStore> = InMemoryRollbackStore::new(7);
    let engine = RollbackEngine::new(history.clone(), records.clone(), store.clone(), 7);
    Fixture {
        keys,
        records,
        history,
        store,
        engine,
    }
}

impl Fixture {
    async fn create_key(&self, name: &str) -> String {
        let key = self
            .keys
            .create(KeyCreate {
                register_id: "r1".to_string(),
                name: name.to_string(),
                schema: json!({"type": "object"}),
                access_mode: None,
                is_encrypted: None,
                meta: Some(KeyMeta::default()),
            })
            .await
            .unwrap();
        key.key()
    }

    async fn create_record(&self, key_id: &str, data: serde_json::Value) -> String {
        self.records
            .create(
                RecordCreate {
                    id: None,
                    register_id: "r1".to_string(),
                    key_id: key_id.to_string(),
                    data,
                    meta: None,
                    allow_tokens: None,
                    search_string: None,
                    signature: None,
                    is_encrypted: None,
                },
                "alice",
                None,
            )
            .await
            .unwrap()
            .key()
    }

    async fn update_record(&self, record_id: &str, data: serde_json::Value) {
        self.records
            .update(
                record_id,
                RecordUpdate {
                    data: Some(data),
                    ..Default::default()
                },
                "alice",
                None,
            )
            .await
            .unwrap();
    }

    async fn start(&self, key_id: &str, time_point: i64) -> String {
        self.engine
            .start_rollback(
                StartRollback {
                    key_id: key_id.to_string(),
                    time_point: format_time_point(time_point),
                },
                "tester",
            )
            .await
            .unwrap()
    }

    /// 轮询到终态 (detached 执行体，进度只能观察)
    async fn wait_terminal(&self, rollback_id: &str) -> RollbackRecord {
        for _ in 0..200 {
            let record = self
                .engine
                .check_rollback_status_with_details(rollback_id)
                .await
                .unwrap();
            if record.status != RollbackStatus::Rollbacking {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("rollback {rollback_id} did not reach a terminal state");
    }
}

/// time point 之后创建的 record 被删除，之后更新的恢复到当时的快照
#[tokio::test]
async fn reconstructs_key_state_at_time_point() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;

    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let time_point = now_millis();
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.update_record(&a, json!({"x": 2})).await;
    let b = f.create_record(&key_id, json!({"y": 1})).await;

    let rollback_id = f.start(&key_id, time_point).await;
    let outcome = f.wait_terminal(&rollback_id).await;

    assert_eq!(outcome.status, RollbackStatus::Rollbacked);
    assert_eq!(outcome.details.history_rows_to_processing, 2);
    assert_eq!(outcome.details.removed_records_count, 1);
    assert_eq!(outcome.details.restored_records_count, 1);
    assert_eq!(outcome.details.error, None);

    let restored = f.records.find_by_id(&a).await.unwrap().unwrap();
    assert_eq!(restored.data, json!({"x": 1}));
    assert!(f.records.find_by_id(&b).await.unwrap().is_none());
}

/// 回滚经由正常 record 操作重放：产生带溯源 meta 的新 history 行
#[tokio::test]
async fn rollback_mutations_are_ledgered_with_provenance() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;

    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let time_point = now_millis();
    tokio::time::sleep(Duration::from_millis(10)).await;
    f.update_record(&a, json!({"x": 2})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let rollback_id = f.start(&key_id, time_point).await;
    f.wait_terminal(&rollback_id).await;

    let (rows, _) = f
        .history
        .find_by_record_id(&a, Page::default(), None)
        .await
        .unwrap();
    // create, update, 回滚的 restore update
    assert_eq!(rows.len(), 3);
    let provenance = &rows[0].meta["rollback"];
    assert_eq!(provenance["id"], json!(rollback_id));
    assert_eq!(
        provenance["time_point"],
        json!(format_time_point(time_point))
    );
}

/// 重复执行同一 time point 的回滚收敛到同一状态 (幂等)
#[tokio::test]
async fn rerunning_a_completed_rollback_is_idempotent() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;

    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let time_point = now_millis();
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.update_record(&a, json!({"x": 2})).await;
    let b = f.create_record(&key_id, json!({"y": 1})).await;

    let first = f.start(&key_id, time_point).await;
    assert_eq!(
        f.wait_terminal(&first).await.status,
        RollbackStatus::Rollbacked
    );

    // 第二次回滚会看到第一次回滚自己产生的账本行，但结果不变
    let second = f.start(&key_id, time_point).await;
    let outcome = f.wait_terminal(&second).await;
    assert_eq!(outcome.status, RollbackStatus::Rollbacked);

    let restored = f.records.find_by_id(&a).await.unwrap().unwrap();
    assert_eq!(restored.data, json!({"x": 1}));
    assert!(f.records.find_by_id(&b).await.unwrap().is_none());
}

/// 同 key 已有进行中的回滚时拒绝，错误信息指出冲突的回滚 id
#[tokio::test]
async fn rejects_concurrent_rollback_for_same_key() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    f.create_record(&key_id, json!({"x": 1})).await;

    f.store
        .put(RollbackRecord {
            id: "in-flight".to_string(),
            key_id: key_id.clone(),
            time_point: now_millis(),
            status: RollbackStatus::Rollbacking,
            details: RollbackDetails::default(),
            started_by: "someone-else".to_string(),
            created_at: now_millis(),
        })
        .await
        .unwrap();

    let err = f
        .engine
        .start_rollback(
            StartRollback {
                key_id: key_id.clone(),
                time_point: format_time_point(now_millis() - 1000),
            },
            "tester",
        )
        .await
        .unwrap_err();

    match err {
        AppError::Conflict(msg) => assert!(msg.contains("in-flight"), "unexpected message: {msg}"),
        other => panic!("expected Conflict, got {other:?}"),
    }
}

/// 另一个 key 的进行中回滚不阻塞本 key
#[tokio::test]
async fn guard_is_scoped_per_key() {
    let f = setup().await;
    let busy_key = f.create_key("busy").await;
    let free_key = f.create_key("free").await;
    f.create_record(&free_key, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.store
        .put(RollbackRecord {
            id: "in-flight".to_string(),
            key_id: busy_key,
            time_point: now_millis(),
            status: RollbackStatus::Rollbacking,
            details: RollbackDetails::default(),
            started_by: "someone-else".to_string(),
            created_at: now_millis(),
        })
        .await
        .unwrap();

    let rollback_id = f.start(&free_key, now_millis() - 5).await;
    let outcome = f.wait_terminal(&rollback_id).await;
    assert_eq!(outcome.status, RollbackStatus::Rollbacked);
}

/// 格式错误、未来时刻、超出保留窗口的 time point 在启动前同步拒绝
#[tokio::test]
async fn start_validation_failures_are_synchronous() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;

    let malformed = f
        .engine
        .start_rollback(
            StartRollback {
                key_id: key_id.clone(),
                time_point: "2024-01-01 10:03:00".to_string(),
            },
            "tester",
        )
        .await;
    assert!(matches!(malformed, Err(AppError::Validation(_))));

    let future = f
        .engine
        .start_rollback(
            StartRollback {
                key_id: key_id.clone(),
                time_point: format_time_point(now_millis() + 60_000),
            },
            "tester",
        )
        .await;
    assert!(matches!(future, Err(AppError::Validation(_))));

    let expired = f
        .engine
        .start_rollback(
            StartRollback {
                key_id: key_id.clone(),
                time_point: format_time_point(now_millis() - 30 * 24 * 60 * 60 * 1000),
            },
            "tester",
        )
        .await;
    assert!(matches!(expired, Err(AppError::Validation(_))));

    let blank_key = f
        .engine
        .start_rollback(
            StartRollback {
                key_id: "  ".to_string(),
                time_point: format_time_point(now_millis() - 1000),
            },
            "tester",
        )
        .await;
    assert!(matches!(blank_key, Err(AppError::Validation(_))));
}

/// time point 之后没有任何变更时回滚是 no-op
#[tokio::test]
async fn rollback_with_no_changes_is_a_noop() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let rollback_id = f.start(&key_id, now_millis()).await;
    let outcome = f.wait_terminal(&rollback_id).await;

    assert_eq!(outcome.status, RollbackStatus::Rollbacked);
    assert_eq!(outcome.details.history_rows_to_processing, 0);
    assert_eq!(outcome.details.removed_records_count, 0);
    assert_eq!(outcome.details.restored_records_count, 0);
    assert!(f.records.find_by_id(&a).await.unwrap().is_some());
}

/// time point 之后创建又删除的 record：重建时既不恢复也不报错
#[tokio::test]
async fn record_created_and_deleted_after_time_point_stays_absent() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let time_point = now_millis();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ephemeral = f.create_record(&key_id, json!({"tmp": true})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.records.delete(&ephemeral, "alice", None).await.unwrap();

    let rollback_id = f.start(&key_id, time_point).await;
    let outcome = f.wait_terminal(&rollback_id).await;

    assert_eq!(outcome.status, RollbackStatus::Rollbacked);
    assert!(f.records.find_by_id(&ephemeral).await.unwrap().is_none());
}

/// time point 之后被删除的 record 按原 id 重建
#[tokio::test]
async fn deleted_record_is_recreated_with_original_id() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let time_point = now_millis();
    tokio::time::sleep(Duration::from_millis(10)).await;

    f.records.delete(&a, "alice", None).await.unwrap();
    assert!(f.records.find_by_id(&a).await.unwrap().is_none());

    let rollback_id = f.start(&key_id, time_point).await;
    let outcome = f.wait_terminal(&rollback_id).await;

    assert_eq!(outcome.status, RollbackStatus::Rollbacked);
    let restored = f.records.find_by_id(&a).await.unwrap().unwrap();
    assert_eq!(restored.key(), a);
    assert_eq!(restored.data, json!({"x": 1}));
}

/// rollback_record 按显式 history 行恢复单个 record
#[tokio::test]
async fn rollback_record_restores_one_revision() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.update_record(&a, json!({"x": 2})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let (rows, _) = f
        .history
        .find_by_record_id(&a, Page::default(), None)
        .await
        .unwrap();
    let create_row = rows
        .iter()
        .find(|r| r.operation == Operation::Create)
        .unwrap();

    let restored = f
        .engine
        .rollback_record(
            RollbackRecordOptions {
                history_id: create_row.key(),
                record_id: a.clone(),
                key_id: key_id.clone(),
            },
            "tester",
        )
        .await
        .unwrap();

    assert_eq!(restored.data, json!({"x": 1}));

    // 恢复本身也上账，带 history_id 溯源
    let (rows, _) = f
        .history
        .find_by_record_id(&a, Page::default(), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].meta["rollback"]["history_id"], json!(create_row.key()));
}

/// rollback_record 校验 history 行归属，不匹配时拒绝
#[tokio::test]
async fn rollback_record_rejects_mismatched_ownership() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    let a = f.create_record(&key_id, json!({"x": 1})).await;
    let b = f.create_record(&key_id, json!({"y": 1})).await;

    let row = f.history.latest_for_record(&a).await.unwrap().unwrap();

    let err = f
        .engine
        .rollback_record(
            RollbackRecordOptions {
                history_id: row.key(),
                record_id: b,
                key_id,
            },
            "tester",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

/// rollback_record 对已删除的 record 按原 id 重建
#[tokio::test]
async fn rollback_record_recreates_deleted_record() {
    let f = setup().await;
    let key_id = f.create_key("contracts").await;
    let a = f.create_record(&key_id, json!({"x": 1})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.records.delete(&a, "alice", None).await.unwrap();

    let (rows, _) = f
        .history
        .find_by_record_id(&a, Page::default(), None)
        .await
        .unwrap();
    let create_row = rows
        .iter()
        .find(|r| r.operation == Operation::Create)
        .unwrap();

    let restored = f
        .engine
        .rollback_record(
            RollbackRecordOptions {
                history_id: create_row.key(),
                record_id: a.clone(),
                key_id,
            },
            "tester",
        )
        .await
        .unwrap();

    assert_eq!(restored.key(), a);
    assert_eq!(restored.data, json!({"x": 1}));
}
