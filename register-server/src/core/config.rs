use std::collections::HashMap;

/// 服务器配置 - register 节点的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/register | 工作目录 (数据库、日志) |
/// | ELASTIC_URL | http://localhost:9200 | 外部搜索索引地址 |
/// | ELASTIC_TIMEOUT_MS | 20000 | 单次索引调用超时(毫秒) |
/// | INDEX_PREFIX | register_key | 索引名前缀 ({prefix}_{keyId}) |
/// | SYNC_POLL_MS | 1000 | sync worker 空闲轮询间隔(毫秒) |
/// | ROLLBACK_RETENTION_DAYS | 7 | 回滚可用的历史窗口(天) |
/// | KEY_AFTERHANDLERS | {} | 静态 per-key 同步目标 (JSON map) |
/// | ENVIRONMENT | development | 运行环境 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/register ELASTIC_URL=http://es:9200 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库和日志文件
    pub work_dir: String,
    /// 运行环境: development | staging | production
    pub environment: String,

    // === 搜索索引 ===
    /// 外部搜索索引 base URL
    pub elastic_url: String,
    /// 单次索引调用超时 (毫秒)
    pub elastic_timeout_ms: u64,
    /// 索引名前缀 (完整索引名为 `{prefix}_{key_id}`)
    pub index_prefix: String,

    // === 同步 ===
    /// sync worker 队列空闲时的轮询间隔 (毫秒)
    pub sync_poll_ms: u64,
    /// 静态配置的 per-key 同步目标 (与 key.meta.afterhandlers 取并集)
    ///
    /// 格式: `{"<key_id>": ["elastic", ...]}`
    pub key_afterhandlers: HashMap<String, Vec<String>>,

    // === 回滚 ===
    /// 回滚可用的历史保留窗口 (天)
    pub rollback_retention_days: u32,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/register".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),

            elastic_url: std::env::var("ELASTIC_URL")
                .unwrap_or_else(|_| "http://localhost:9200".into()),
            elastic_timeout_ms: std::env::var("ELASTIC_TIMEOUT_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(20000),
            index_prefix: std::env::var("INDEX_PREFIX").unwrap_or_else(|_| "register_key".into()),

            sync_poll_ms: std::env::var("SYNC_POLL_MS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(1000),
            key_afterhandlers: std::env::var("KEY_AFTERHANDLERS")
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default(),

            rollback_retention_days: std::env::var("ROLLBACK_RETENTION_DAYS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(7),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, elastic_url: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.elastic_url = elastic_url.into();
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
