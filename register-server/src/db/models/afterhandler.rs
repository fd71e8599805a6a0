//! Afterhandler Model (outbox entry)
//!
//! 每条 afterhandler 表示"这次变更还需要送达某个外部系统"。
//! 生命周期：创建时 `synced=false` (待处理)，由 sync worker 恰好一次地
//! 迁移到终态 — `synced=true, has_error=false` (已送达) 或
//! `synced=true, has_error=true` (永久失败，不自动重试)。

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// 同步目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterhandlerType {
    Elastic,
    Blockchain,
    Plink,
}

impl std::fmt::Display for AfterhandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AfterhandlerType::Elastic => write!(f, "elastic"),
            AfterhandlerType::Blockchain => write!(f, "blockchain"),
            AfterhandlerType::Plink => write!(f, "plink"),
        }
    }
}

impl std::str::FromStr for AfterhandlerType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elastic" => Ok(AfterhandlerType::Elastic),
            "blockchain" => Ok(AfterhandlerType::Blockchain),
            "plink" => Ok(AfterhandlerType::Plink),
            _ => Err(()),
        }
    }
}

/// Afterhandler model matching SurrealDB schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Afterhandler {
    pub id: Option<RecordId>,
    #[serde(rename = "type")]
    pub kind: AfterhandlerType,
    /// 指向产生该条目的 history 行 (record link，恰好一个)
    pub history_id: RecordId,
    pub synced: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
}

impl Afterhandler {
    /// Afterhandler 的纯 id (不含表前缀、不含转义)
    pub fn key(&self) -> String {
        self.id.as_ref().map(super::plain_id).unwrap_or_default()
    }
}
