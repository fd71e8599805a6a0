//! Rollback Module — time-travel 回滚
//!
//! 纯粹从 append-only 账本重建某 key 在过去任意时刻的记录集，
//! 并通过**正常的** create/update/delete 操作重放 — 回滚本身也会
//! 产生新的 history 行和 outbox 条目，从不绕过同步管道。

pub mod engine;
pub mod store;
pub mod types;

pub use engine::RollbackEngine;
pub use store::{InMemoryRollbackStore, RollbackStore};
pub use types::{RollbackDetails, RollbackRecord, RollbackRecordOptions, RollbackStatus, StartRollback};
