//! SyncTarget — 同步目标抽象
//!
//! 每种 afterhandler 类型对应一个实现。worker 对 trait 编程，
//! 测试可注入桩实现。

use async_trait::async_trait;

use crate::db::models::{AfterhandlerType, History};
use crate::utils::AppResult;

/// 外部系统同步目标
///
/// `handle` 把一条 history 变更应用到外部系统。实现**不得**吞掉错误 —
/// 把失败标记到 outbox 条目是排空循环的职责。
/// 幂等性要求：同一 history 行重复 handle 必须安全 (at-least-once 投递)。
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// 该目标处理的 afterhandler 类型
    fn kind(&self) -> AfterhandlerType;

    /// 应用一条变更；返回 `true` 表示已处理 (包括"目标侧已是期望状态")
    async fn handle(&self, history: &History) -> AppResult<bool>;
}
