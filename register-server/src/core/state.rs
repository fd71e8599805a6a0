use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::local::Db;

use crate::core::Config;
use crate::db::DbService;
use crate::db::repository::{
    AfterhandlerRepository, HistoryRepository, KeyRepository, RecordRepository,
};
use crate::rollback::{InMemoryRollbackStore, RollbackEngine, RollbackStore};
use crate::sync::{ElasticClient, ElasticTarget, Reindexer, SyncReconciler, SyncTarget};
use crate::utils::AppResult;

/// 服务器状态 - 持有所有服务的共享引用
///
/// 所有服务显式构造、显式注入，没有进程级全局单例。
/// Clone 是浅拷贝 (内部 Arc / 连接句柄)。
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | db | 嵌入式数据库 (SurrealDB) |
/// | keys / records / history / afterhandlers | 仓库层 |
/// | elastic | 搜索索引同步目标 |
/// | reindexer | 索引全量重建 |
/// | reconciler | per-key 同步状态分类 |
/// | rollback | time-travel 回滚引擎 |
#[derive(Clone)]
pub struct RegisterState {
    pub config: Config,
    pub db: Surreal<Db>,
    pub keys: KeyRepository,
    pub records: RecordRepository,
    pub history: HistoryRepository,
    pub afterhandlers: AfterhandlerRepository,
    pub elastic: ElasticTarget,
    pub reindexer: Reindexer,
    pub reconciler: SyncReconciler,
    pub rollback: RollbackEngine,
    pub rollback_store: Arc<dyn RollbackStore>,
}

impl RegisterState {
    /// 打开持久化数据库并构造全部服务
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let db = DbService::open(&config.work_dir).await?;
        Self::with_db(config, db)
    }

    /// 基于已打开的数据库构造 (测试用内存库走这里)
    pub fn with_db(config: Config, db: Surreal<Db>) -> AppResult<Self> {
        let keys = KeyRepository::new(db.clone());
        let history = HistoryRepository::new(db.clone());
        let afterhandlers = AfterhandlerRepository::new(db.clone());
        let records = RecordRepository::new(db.clone(), config.key_afterhandlers.clone());

        let elastic = ElasticTarget::new(ElasticClient::new(&config)?);
        let reindexer = Reindexer::new(records.clone(), elastic.clone());
        let reconciler = SyncReconciler::new(
            keys.clone(),
            records.clone(),
            afterhandlers.clone(),
            elastic.clone(),
            reindexer.clone(),
            config.key_afterhandlers.clone(),
        );

        let rollback_store: Arc<dyn RollbackStore> =
            InMemoryRollbackStore::new(config.rollback_retention_days);
        let rollback = RollbackEngine::new(
            history.clone(),
            records.clone(),
            rollback_store.clone(),
            config.rollback_retention_days,
        );

        Ok(Self {
            config,
            db,
            keys,
            records,
            history,
            afterhandlers,
            elastic,
            reindexer,
            reconciler,
            rollback,
            rollback_store,
        })
    }

    /// 已注册的同步目标 (每个类型一个 worker)
    ///
    /// blockchain/plink 类型目前没有目标实现：它们的 outbox 条目
    /// 会累积为 pending，直到对应实现注册进来。
    pub fn sync_targets(&self) -> Vec<Arc<dyn SyncTarget>> {
        vec![Arc::new(self.elastic.clone())]
    }
}
