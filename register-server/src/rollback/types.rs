//! Rollback 状态与 DTO

use serde::{Deserialize, Serialize};

/// 回滚状态机: `Rollbacking → Rollbacked | Failed` (终态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    Rollbacking,
    Rollbacked,
    Failed,
}

/// 进度计数器 — 每处理一条增量更新，供轮询观察
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackDetails {
    /// 待处理的 history 行数 (time point 之后的全部行)
    pub history_rows_to_processing: u64,
    /// remove 阶段已删除的 record 数
    pub removed_records_count: u64,
    /// restore 阶段已恢复的 record 数
    pub restored_records_count: u64,
    /// 失败原因 (status == Failed 时设置)
    pub error: Option<String>,
}

/// 一次回滚尝试的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: String,
    pub key_id: String,
    /// 目标时刻 (Unix millis)
    pub time_point: i64,
    pub status: RollbackStatus,
    pub details: RollbackDetails,
    pub started_by: String,
    pub created_at: i64,
}

/// `start_rollback` 入参
#[derive(Debug, Clone, Deserialize)]
pub struct StartRollback {
    pub key_id: String,
    /// 严格格式 `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub time_point: String,
}

/// `rollback_record` 入参 — 按显式 history 行恢复单个 record
#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRecordOptions {
    pub history_id: String,
    pub record_id: String,
    pub key_id: String,
}
