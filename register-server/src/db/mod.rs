//! Database Module
//!
//! 嵌入式 SurrealDB 连接与表结构定义。

pub mod models;
pub mod repository;

use std::path::Path;

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem, RocksDb};

use crate::utils::AppError;

const NAMESPACE: &str = "register";
const DATABASE: &str = "register";

/// Database service — opens the embedded SurrealDB instance
pub struct DbService;

impl DbService {
    /// 打开持久化数据库 (RocksDB 后端)，并应用表结构
    pub async fn open(work_dir: &str) -> Result<Surreal<Db>, AppError> {
        let db_path = Path::new(work_dir).join("register.db");
        let db: Surreal<Db> = Surreal::new::<RocksDb>(db_path.as_path())
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;
        Self::init(&db).await?;
        tracing::info!("Database connection established (SurrealDB RocksDB)");
        Ok(db)
    }

    /// 打开内存数据库 (测试用)，同样应用表结构
    pub async fn memory() -> Result<Surreal<Db>, AppError> {
        let db: Surreal<Db> = Surreal::new::<Mem>(())
            .await
            .map_err(|e| AppError::database(format!("Failed to open in-memory database: {e}")))?;
        Self::init(&db).await?;
        Ok(db)
    }

    async fn init(db: &Surreal<Db>) -> Result<(), AppError> {
        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| AppError::database(format!("Failed to select namespace: {e}")))?;
        Self::define_schema(db).await?;
        Ok(())
    }

    /// 定义表与索引
    ///
    /// 表保持 SCHEMALESS (record.data 按 key 的 JSON-Schema 动态变化)，
    /// 索引覆盖账本扫描和 outbox 抽取的热路径。
    async fn define_schema(db: &Surreal<Db>) -> Result<(), AppError> {
        db.query(
            "
            DEFINE TABLE IF NOT EXISTS record SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS record_key ON record FIELDS key_id;

            DEFINE TABLE IF NOT EXISTS key SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS key_register ON key FIELDS register_id;

            DEFINE TABLE IF NOT EXISTS history SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS history_key_created ON history FIELDS key_id, created_at;
            DEFINE INDEX IF NOT EXISTS history_record_created ON history FIELDS record_id, created_at;

            DEFINE TABLE IF NOT EXISTS afterhandler SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS afterhandler_pending ON afterhandler FIELDS type, synced, created_at;
            ",
        )
        .await
        .map_err(|e| AppError::database(format!("Failed to define schema: {e}")))?;
        Ok(())
    }
}
