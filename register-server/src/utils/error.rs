//! 统一错误处理
//!
//! 提供应用级错误类型 [`AppError`] 和结果别名 [`AppResult`]。
//!
//! # 错误分类
//!
//! | 分类 | 说明 |
//! |------|------|
//! | 业务逻辑错误 | 资源不存在、验证失败、冲突 |
//! | 同步错误 | 外部索引调用失败 |
//! | 系统错误 | 数据库错误、内部错误 |

use tracing::error;

/// 应用错误枚举
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== 业务逻辑错误 ==========
    #[error("Resource not found: {0}")]
    /// 资源不存在
    NotFound(String),

    #[error("Conflict: {0}")]
    /// 资源冲突 (例如同 key 已有进行中的回滚)
    Conflict(String),

    #[error("Validation failed: {0}")]
    /// 验证失败
    Validation(String),

    // ========== 同步错误 ==========
    #[error("Sync error: {0}")]
    /// 外部索引同步失败
    Sync(String),

    // ========== 系统错误 ==========
    #[error("Database error: {0}")]
    /// 数据库错误
    Database(String),

    #[error("Internal server error: {0}")]
    /// 内部错误
    Internal(String),
}

/// 应用结果别名
pub type AppResult<T> = Result<T, AppError>;

// ========== Helper Constructors ==========

impl AppError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        error!(target: "database", error = %msg, "Database error occurred");
        Self::Database(msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<surrealdb::Error> for AppError {
    fn from(err: surrealdb::Error) -> Self {
        AppError::database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {err}"))
    }
}
