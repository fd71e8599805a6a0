//! History Model
//!
//! Append-only 变更账本。不可变：代码中不存在针对 `history` 表的
//! UPDATE/DELETE 语句。严格按 `(created_at, id)` 排序。
//!
//! 状态规则：对任意 record 和时刻 T，`created_at <= T` 的最新非 delete 行
//! 即该 record 在 T 时的状态；没有这样的行 (或最新一行是 delete) 表示
//! record 在 T 时不存在。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::RecordId;

use super::RecordSnapshot;

/// 变更操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// History model matching SurrealDB schema
///
/// `data` 是完整的 record 快照：create/update 为操作**之后**的状态，
/// delete 为操作**之前**的状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: Option<RecordId>,
    /// Record 的纯 id (不含表前缀)
    pub record_id: String,
    pub register_id: String,
    pub key_id: String,
    pub operation: Operation,
    pub data: RecordSnapshot,
    /// 触发该变更的用户
    pub person: String,
    pub created_by: String,
    pub updated_by: String,
    /// 附加元数据 (例如回滚溯源标记)
    #[serde(default)]
    pub meta: Value,
    pub created_at: i64,
}

impl History {
    /// History 行的纯 id (不含表前缀、不含转义)
    pub fn key(&self) -> String {
        self.id.as_ref().map(super::plain_id).unwrap_or_default()
    }
}
