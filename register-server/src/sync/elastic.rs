//! ElasticTarget — 搜索索引同步目标
//!
//! 索引命名 `{prefix}_{key_id}`，文档命名 `record-{record_id}`。
//! 映射从 key 的 JSON-Schema 推导：仅带显式 `indexType` 提示的属性
//! 进入映射，object / array-of-object 子 schema 递归。

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::target::SyncTarget;
use crate::core::Config;
use crate::db::models::{AfterhandlerType, History, Key, Operation, Record};
use crate::utils::{AppError, AppResult};

/// `_count` 查询的三态结果
///
/// reconciler 需要区分"索引不存在" (重建中) 和其它失败。
#[derive(Debug, Error)]
pub enum CountError {
    #[error("index not found")]
    IndexNotFound,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// HTTP client for the external search index
#[derive(Clone)]
pub struct ElasticClient {
    client: Client,
    base_url: String,
    index_prefix: String,
}

impl ElasticClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.elastic_timeout_ms))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.elastic_url.trim_end_matches('/').to_string(),
            index_prefix: config.index_prefix.clone(),
        })
    }

    /// 完整索引名: `{prefix}_{key_id}`
    pub fn index_name(&self, key_id: &str) -> String {
        format!("{}_{}", self.index_prefix, key_id)
    }

    fn index_url(&self, key_id: &str) -> String {
        format!("{}/{}", self.base_url, self.index_name(key_id))
    }

    fn doc_url(&self, key_id: &str, doc_id: &str) -> String {
        format!("{}/_doc/{}", self.index_url(key_id), doc_id)
    }

    /// 写入/覆盖单个文档 (幂等 upsert)
    pub async fn upsert_doc(&self, key_id: &str, doc_id: &str, body: &Value) -> AppResult<()> {
        let response = self
            .client
            .put(self.doc_url(key_id, doc_id))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::sync(format!("Index upsert request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::sync(Self::failure_reason(response).await));
        }
        Ok(())
    }

    /// 删除单个文档
    ///
    /// 404 表示目标状态已达成，返回 `Ok(false)` 而不是错误。
    pub async fn delete_doc(&self, key_id: &str, doc_id: &str) -> AppResult<bool> {
        let response = self
            .client
            .delete(self.doc_url(key_id, doc_id))
            .send()
            .await
            .map_err(|e| AppError::sync(format!("Index delete request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(AppError::sync(Self::failure_reason(response).await));
        }
        Ok(true)
    }

    /// 创建索引 (带映射)
    pub async fn create_index(&self, key_id: &str, body: &Value) -> AppResult<()> {
        let response = self
            .client
            .put(self.index_url(key_id))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::sync(format!("Index create request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::sync(Self::failure_reason(response).await));
        }
        Ok(())
    }

    /// 删除索引 (404 容忍)
    pub async fn delete_index(&self, key_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(self.index_url(key_id))
            .send()
            .await
            .map_err(|e| AppError::sync(format!("Index drop request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(AppError::sync(Self::failure_reason(response).await))
    }

    /// 索引文档计数
    pub async fn count(&self, key_id: &str) -> Result<u64, CountError> {
        let response = self
            .client
            .get(format!("{}/_count", self.index_url(key_id)))
            .send()
            .await
            .map_err(|e| CountError::Other(format!("Index count request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CountError::IndexNotFound);
        }
        if !response.status().is_success() {
            let reason = Self::failure_reason(response).await;
            if reason.contains("index_not_found") {
                return Err(CountError::IndexNotFound);
            }
            return Err(CountError::Other(reason));
        }

        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| CountError::Other(format!("Failed to parse count response: {e}")))?;
        Ok(body.count)
    }

    /// 把结构化的 ES 错误体展开为可读原因，退化时用原始响应
    async fn failure_reason(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            let error = &parsed["error"];
            if let Some(reason) = error["reason"].as_str() {
                return reason.to_string();
            }
            if let Some(kind) = error["type"].as_str() {
                return kind.to_string();
            }
        }
        format!("Index request failed with status {status}: {body}")
    }
}

/// 搜索索引同步目标
#[derive(Clone)]
pub struct ElasticTarget {
    client: ElasticClient,
}

impl ElasticTarget {
    pub fn new(client: ElasticClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ElasticClient {
        &self.client
    }

    fn doc_id(record_id: &str) -> String {
        format!("record-{record_id}")
    }

    /// Drop 并按 key 的 JSON-Schema 重建索引
    ///
    /// schema 或分析器变化后需要全量重建时使用。
    pub async fn reindex_reset(&self, key: &Key) -> AppResult<()> {
        let key_id = key.key();
        self.client.delete_index(&key_id).await?;
        self.client
            .create_index(&key_id, &schema_mappings(&key.schema))
            .await?;
        tracing::info!(key_id = %key_id, "Search index reset");
        Ok(())
    }

    /// 账本管道之外的幂等单文档写入 (重灌用)
    pub async fn reindex_add(&self, record: &Record) -> AppResult<()> {
        let doc = serde_json::to_value(record.snapshot())?;
        self.client
            .upsert_doc(&record.key_id, &Self::doc_id(&record.key()), &doc)
            .await
    }

    /// 索引文档计数 (reconciler 输入)
    pub async fn index_count(&self, key_id: &str) -> Result<u64, CountError> {
        self.client.count(key_id).await
    }
}

#[async_trait]
impl SyncTarget for ElasticTarget {
    fn kind(&self) -> AfterhandlerType {
        AfterhandlerType::Elastic
    }

    async fn handle(&self, history: &History) -> AppResult<bool> {
        let doc_id = Self::doc_id(&history.record_id);
        match history.operation {
            Operation::Create | Operation::Update => {
                let doc = serde_json::to_value(&history.data)?;
                self.client
                    .upsert_doc(&history.key_id, &doc_id, &doc)
                    .await?;
                Ok(true)
            }
            Operation::Delete => {
                // absent == already done, 不是错误
                self.client.delete_doc(&history.key_id, &doc_id).await?;
                Ok(true)
            }
        }
    }
}

/// 从 key 的 JSON-Schema 推导索引映射
///
/// 仅带显式 `indexType` 提示的属性进入映射；`text` 类型附加
/// `exact` keyword 子字段用于精确匹配。
pub fn schema_mappings(schema: &Value) -> Value {
    json!({ "mappings": { "properties": walk_properties(schema) } })
}

fn walk_properties(schema: &Value) -> Map<String, Value> {
    let mut mapped = Map::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return mapped;
    };

    for (name, prop) in properties {
        // object 子 schema
        if prop.get("properties").is_some() {
            let nested = walk_properties(prop);
            if !nested.is_empty() {
                mapped.insert(name.clone(), json!({ "properties": nested }));
            }
            continue;
        }
        // array-of-object 子 schema
        if let Some(items) = prop.get("items")
            && items.get("properties").is_some()
        {
            let nested = walk_properties(items);
            if !nested.is_empty() {
                mapped.insert(name.clone(), json!({ "properties": nested }));
            }
            continue;
        }
        // 叶子属性：仅显式提示的进入映射
        if let Some(index_type) = prop.get("indexType").and_then(Value::as_str) {
            let entry = if index_type == "text" {
                json!({
                    "type": "text",
                    "fields": { "exact": { "type": "keyword" } }
                })
            } else {
                json!({ "type": index_type })
            };
            mapped.insert(name.clone(), entry);
        }
    }
    mapped
}
