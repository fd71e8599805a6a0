//! Sync Module — outbox 排空与外部索引一致性
//!
//! - [`SyncTarget`] - 同步目标抽象 (每种 afterhandler 类型一个实现)
//! - [`ElasticTarget`] - 搜索索引的具体实现
//! - [`SyncWorker`] - 每目标一个的排空循环
//! - [`SyncReconciler`] - 只读的 per-key 同步状态分类器
//! - [`Reindexer`] - 索引重建 (drop + recreate + 重灌)

pub mod elastic;
pub mod reconciler;
pub mod reindex;
pub mod target;
pub mod worker;

pub use elastic::{ElasticClient, ElasticTarget};
pub use reconciler::{SyncReconciler, SyncStatus};
pub use reindex::Reindexer;
pub use target::SyncTarget;
pub use worker::SyncWorker;
