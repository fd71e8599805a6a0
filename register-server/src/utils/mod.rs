//! 工具模块 - 通用工具函数和类型
//!
//! - [`AppError`] / [`AppResult`] - 应用错误类型
//! - [`time`] - 时间戳与 time point 解析
//! - [`logger`] - tracing 初始化

pub mod error;
pub mod logger;
pub mod time;

pub use error::{AppError, AppResult};
pub use time::now_millis;
