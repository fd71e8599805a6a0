//! Register Server - schema-flexible record store with ledgered sync
//!
//! # 架构概述
//!
//! 任意类型化集合 (key) 存放 JSON-Schema 约束的 record，每次变更
//! 追加一条 history 账本行，并通过 outbox (afterhandler) 异步传播到
//! 外部搜索索引。账本之上有三个核心组件：
//!
//! - **Sync Worker** (`sync::worker`): 排空 outbox，保持外部索引最终一致
//! - **Sync Reconciler** (`sync::reconciler`): 三路计数对比，分类 per-key 同步状态
//! - **Rollback Engine** (`rollback`): 纯粹从账本重建 key 在过去任意时刻的记录集
//!
//! # 模块结构
//!
//! ```text
//! register-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── utils/         # 错误、时间、日志
//! ├── db/            # 数据库层 (models + repositories)
//! ├── sync/          # outbox 排空、索引重建、状态分类
//! └── rollback/      # time-travel 回滚
//! ```

pub mod core;
pub mod db;
pub mod rollback;
pub mod sync;
pub mod utils;

// Re-export 公共类型
pub use core::{BackgroundTasks, Config, RegisterState, TaskKind};
pub use db::DbService;
pub use db::models::{Afterhandler, AfterhandlerType, History, Key, Operation, Record};
pub use rollback::{RollbackEngine, RollbackRecord, RollbackStatus, StartRollback};
pub use sync::{SyncReconciler, SyncStatus, SyncTarget, SyncWorker};
pub use utils::{AppError, AppResult};

// Re-export logger init
pub use utils::logger::init_logger;
