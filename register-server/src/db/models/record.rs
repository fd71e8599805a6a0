//! Record Model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::RecordId;

/// Record model matching SurrealDB schema
///
/// `data` 是按 key 的 JSON-Schema 校验过的任意 JSON (校验在 HTTP 层完成)。
/// 仅通过 `RecordRepository` 的 create/update/delete 变更，
/// 每次变更在同一事务内追加一行 `history`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: Option<RecordId>,
    pub register_id: String,
    pub key_id: String,
    pub data: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub allow_tokens: Vec<String>,
    pub search_string: Option<String>,
    pub signature: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record {
    /// Record 的纯 id (不含表前缀、不含转义)
    pub fn key(&self) -> String {
        self.id.as_ref().map(super::plain_id).unwrap_or_default()
    }

    /// 当前状态的完整快照 (写入 history.data)
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            register_id: self.register_id.clone(),
            key_id: self.key_id.clone(),
            data: self.data.clone(),
            meta: self.meta.clone(),
            allow_tokens: self.allow_tokens.clone(),
            search_string: self.search_string.clone(),
            signature: self.signature.clone(),
            is_encrypted: self.is_encrypted,
            created_by: self.created_by.clone(),
            updated_by: self.updated_by.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Record 状态快照 — 除 id 外的全部字段
///
/// 双重用途：插入 SurrealDB 的 CONTENT (id 由 `type::thing` 提供)，
/// 以及 history 行的 `data` 字段 (回滚据此重建 record)。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub register_id: String,
    pub key_id: String,
    pub data: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub allow_tokens: Vec<String>,
    pub search_string: Option<String>,
    pub signature: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Record for creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordCreate {
    /// 预设 id (回滚重建时保留原 id)，为空时生成 uuid
    pub id: Option<String>,
    pub register_id: String,
    pub key_id: String,
    pub data: Value,
    pub meta: Option<Value>,
    pub allow_tokens: Option<Vec<String>>,
    pub search_string: Option<String>,
    pub signature: Option<String>,
    pub is_encrypted: Option<bool>,
}

/// Record for update (all optional, `None` = keep current value)
///
/// 回滚恢复不走 merge 语义，见 `RecordRepository::update_from_snapshot`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub data: Option<Value>,
    pub meta: Option<Value>,
    pub allow_tokens: Option<Vec<String>>,
    pub search_string: Option<String>,
    pub signature: Option<String>,
}
