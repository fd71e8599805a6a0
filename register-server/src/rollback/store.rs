//! Rollback 进度存储
//!
//! trait 抽象让多副本部署可以注入共享存储。per-key 互斥由
//! [`RollbackStore::try_begin`] 的原子登记保证 — 检查和写入不拆成
//! 两步，进程内并发的 start 调用最多一个成功。
//! 默认的内存实现是 process-local 的：重启丢失，多个副本之间
//! **不**互斥 — 这是已知缺口，不在此悄悄修复。

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{RollbackRecord, RollbackStatus};
use crate::utils::{AppResult, now_millis};

/// 回滚进度的键值存储抽象
#[async_trait]
pub trait RollbackStore: Send + Sync {
    /// 原子登记一条进行中的回滚
    ///
    /// 同 key 已有 Rollbacking 记录时不写入，返回冲突的那条记录；
    /// 登记成功返回 `None`。
    async fn try_begin(&self, record: RollbackRecord) -> AppResult<Option<RollbackRecord>>;

    /// 写入/覆盖一条回滚记录；写入终态时释放该 key 的互斥登记
    async fn put(&self, record: RollbackRecord) -> AppResult<()>;

    /// 按 id 读取
    async fn get(&self, id: &str) -> AppResult<Option<RollbackRecord>>;

    /// 某 key 当前处于 Rollbacking 状态的记录
    async fn find_active_by_key(&self, key_id: &str) -> AppResult<Option<RollbackRecord>>;

    /// 清除超过保留期的记录，返回清除数量
    async fn sweep_expired(&self) -> AppResult<usize>;
}

/// 内存实现 (DashMap)，条目在保留期后自动过期
pub struct InMemoryRollbackStore {
    /// rollback id → 记录
    entries: DashMap<String, RollbackRecord>,
    /// key id → 进行中的 rollback id (互斥登记)
    active: DashMap<String, String>,
    ttl_ms: i64,
}

impl InMemoryRollbackStore {
    pub fn new(retention_days: u32) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            active: DashMap::new(),
            ttl_ms: (retention_days as i64) * 24 * 60 * 60 * 1000,
        })
    }
}

#[async_trait]
impl RollbackStore for InMemoryRollbackStore {
    async fn try_begin(&self, record: RollbackRecord) -> AppResult<Option<RollbackRecord>> {
        // entry 持有 key 对应分片的锁，检查和登记之间没有窗口
        match self.active.entry(record.key_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = self.entries.get(occupied.get()) {
                    return Ok(Some(existing.clone()));
                }
                // 登记指向已被清除的记录，视为陈旧并接管
                occupied.insert(record.id.clone());
                self.entries.insert(record.id.clone(), record);
                Ok(None)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.id.clone());
                self.entries.insert(record.id.clone(), record);
                Ok(None)
            }
        }
    }

    async fn put(&self, record: RollbackRecord) -> AppResult<()> {
        match record.status {
            RollbackStatus::Rollbacking => {
                self.active
                    .insert(record.key_id.clone(), record.id.clone());
            }
            // 终态释放互斥登记 (仅当登记属于这条记录)
            _ => {
                self.active
                    .remove_if(&record.key_id, |_, id| id == &record.id);
            }
        }
        self.entries.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> AppResult<Option<RollbackRecord>> {
        Ok(self.entries.get(id).map(|r| r.clone()))
    }

    async fn find_active_by_key(&self, key_id: &str) -> AppResult<Option<RollbackRecord>> {
        let Some(id) = self.active.get(key_id).map(|r| r.clone()) else {
            return Ok(None);
        };
        Ok(self.entries.get(&id).map(|r| r.clone()))
    }

    async fn sweep_expired(&self) -> AppResult<usize> {
        let cutoff = now_millis() - self.ttl_ms;
        let mut released: Vec<(String, String)> = Vec::new();
        self.entries.retain(|id, record| {
            let keep = record.created_at >= cutoff;
            if !keep {
                released.push((record.key_id.clone(), id.clone()));
            }
            keep
        });
        for (key_id, id) in &released {
            self.active.remove_if(key_id, |_, active| active == id);
        }
        Ok(released.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollback::types::RollbackDetails;

    fn record(id: &str, key_id: &str, status: RollbackStatus, created_at: i64) -> RollbackRecord {
        RollbackRecord {
            id: id.to_string(),
            key_id: key_id.to_string(),
            time_point: 0,
            status,
            details: RollbackDetails::default(),
            started_by: "tester".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_per_key() {
        let store = InMemoryRollbackStore::new(7);
        let claimed = store
            .try_begin(record("a", "k1", RollbackStatus::Rollbacking, now_millis()))
            .await
            .unwrap();
        assert!(claimed.is_none());

        let conflict = store
            .try_begin(record("b", "k1", RollbackStatus::Rollbacking, now_millis()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conflict.id, "a");

        // 其它 key 不受影响
        assert!(
            store
                .try_begin(record("c", "k2", RollbackStatus::Rollbacking, now_millis()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one() {
        let store = InMemoryRollbackStore::new(7);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_begin(record(
                        &format!("r{i}"),
                        "k1",
                        RollbackStatus::Rollbacking,
                        now_millis(),
                    ))
                    .await
                    .unwrap()
                    .is_none()
            }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn terminal_put_releases_the_claim() {
        let store = InMemoryRollbackStore::new(7);
        store
            .try_begin(record("a", "k1", RollbackStatus::Rollbacking, now_millis()))
            .await
            .unwrap();

        store
            .put(record("a", "k1", RollbackStatus::Rollbacked, now_millis()))
            .await
            .unwrap();

        assert!(store.find_active_by_key("k1").await.unwrap().is_none());
        assert!(
            store
                .try_begin(record("b", "k1", RollbackStatus::Rollbacking, now_millis()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn finds_only_active_rollbacks_for_key() {
        let store = InMemoryRollbackStore::new(7);
        store
            .put(record("a", "k1", RollbackStatus::Rollbacked, now_millis()))
            .await
            .unwrap();
        store
            .put(record("b", "k1", RollbackStatus::Rollbacking, now_millis()))
            .await
            .unwrap();
        store
            .put(record("c", "k2", RollbackStatus::Rollbacking, now_millis()))
            .await
            .unwrap();

        let active = store.find_active_by_key("k1").await.unwrap().unwrap();
        assert_eq!(active.id, "b");
    }

    #[tokio::test]
    async fn sweeps_entries_past_retention() {
        let store = InMemoryRollbackStore::new(7);
        let old = now_millis() - 8 * 24 * 60 * 60 * 1000;
        store
            .put(record("old", "k1", RollbackStatus::Rollbacked, old))
            .await
            .unwrap();
        store
            .put(record("fresh", "k1", RollbackStatus::Rollbacked, now_millis()))
            .await
            .unwrap();

        let swept = store.sweep_expired().await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_releases_stale_claims() {
        let store = InMemoryRollbackStore::new(7);
        let old = now_millis() - 8 * 24 * 60 * 60 * 1000;
        store
            .try_begin(record("stuck", "k1", RollbackStatus::Rollbacking, old))
            .await
            .unwrap();

        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(
            store
                .try_begin(record("new", "k1", RollbackStatus::Rollbacking, now_millis()))
                .await
                .unwrap()
                .is_none()
        );
    }
}
