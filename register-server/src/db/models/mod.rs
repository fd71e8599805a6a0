//! Data models matching the SurrealDB schema
//!
//! 四张核心表：
//! - `record` — 当前状态 (可变，仅通过 repository 的 create/update/delete 变更)
//! - `key` — 类型集合定义 (JSON-Schema + 同步目标配置)
//! - `history` — append-only 变更账本，每次 record 变更恰好一行
//! - `afterhandler` — outbox 条目，每 (history 行 × 启用的同步目标) 一行

pub mod afterhandler;
pub mod history;
pub mod key;
pub mod record;

pub use afterhandler::{Afterhandler, AfterhandlerType};
pub use history::{History, Operation};
pub use key::{AccessMode, Key, KeyCreate, KeyMeta};
pub use record::{Record, RecordCreate, RecordSnapshot, RecordUpdate};

use surrealdb::RecordId;

/// 从 RecordId 提取纯 id 字符串
///
/// `RecordIdKey` 的 Display 对非简单标识符的 key 做 SurrealQL 转义 —
/// uuid 的连字符就会触发，`to_string()` 得到 `` `uuid` `` 或 `⟨uuid⟩`。
/// 仓库接口统一使用去掉转义的原始字符串寻址，这里是唯一的提取点。
pub(crate) fn plain_id(id: &RecordId) -> String {
    let raw = id.key().to_string();
    if let Some(inner) = raw.strip_prefix('⟨').and_then(|s| s.strip_suffix('⟩')) {
        return inner.replace("\\⟩", "⟩");
    }
    if let Some(inner) = raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return inner.replace("\\`", "`");
    }
    raw
}
