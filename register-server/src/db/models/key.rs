//! Key Model
//!
//! Key 定义一个 schema-flexible 的记录集合：JSON-Schema、访问模式、
//! 以及该集合的记录启用哪些同步目标。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::RecordId;

use super::AfterhandlerType;

/// 访问模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Full,
    ReadOnly,
    WriteOnly,
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Full
    }
}

/// Key 元数据
///
/// `afterhandlers` 列出该 key 启用的同步目标类型。
/// 与静态配置 (`Config::key_afterhandlers`) 取并集。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyMeta {
    #[serde(default)]
    pub afterhandlers: Vec<String>,
}

/// Key model matching SurrealDB schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: Option<RecordId>,
    pub register_id: String,
    pub name: String,
    /// 集合内 record.data 的 JSON-Schema
    pub schema: Value,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub is_encrypted: bool,
    #[serde(default)]
    pub meta: KeyMeta,
}

impl Key {
    /// Key 的纯 id (不含表前缀、不含转义)
    pub fn key(&self) -> String {
        self.id.as_ref().map(super::plain_id).unwrap_or_default()
    }

    /// 该 key 启用的同步目标类型
    ///
    /// 静态配置 (keyed by key id) 与 `meta.afterhandlers` 的并集，
    /// 去重，保持首次出现的顺序。无法识别的类型名被忽略并告警。
    pub fn enabled_targets(
        &self,
        static_map: &HashMap<String, Vec<String>>,
    ) -> Vec<AfterhandlerType> {
        let key_id = self.key();
        let configured = static_map.get(&key_id).map(Vec::as_slice).unwrap_or(&[]);

        let mut targets = Vec::new();
        for name in configured.iter().chain(self.meta.afterhandlers.iter()) {
            match name.parse::<AfterhandlerType>() {
                Ok(t) if !targets.contains(&t) => targets.push(t),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(key_id = %key_id, target = %name, "Unknown afterhandler type, ignoring");
                }
            }
        }
        targets
    }
}

/// Key for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCreate {
    pub register_id: String,
    pub name: String,
    pub schema: Value,
    pub access_mode: Option<AccessMode>,
    pub is_encrypted: Option<bool>,
    pub meta: Option<KeyMeta>,
}
