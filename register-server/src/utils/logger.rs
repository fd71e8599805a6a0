//! tracing 初始化
//!
//! 过滤器取 `RUST_LOG`，未设置时退回 `LOG_LEVEL` (默认 info)。
//! `LOG_DIR` 指向已存在的目录时，额外写入按天滚动的日志文件。

use std::path::Path;

use tracing_subscriber::EnvFilter;

/// 日志文件名前缀 (tracing-appender 按天追加日期后缀)
const LOG_FILE_PREFIX: &str = "register-server";

/// Initialize the logger from environment variables
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match std::env::var("LOG_DIR") {
        Ok(dir) if Path::new(&dir).exists() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            builder.with_writer(appender).init();
        }
        _ => builder.init(),
    }
}
