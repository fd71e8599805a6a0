use std::time::Duration;

use register_server::{BackgroundTasks, Config, RegisterState, TaskKind};
use register_server::db::repository::{AfterhandlerRepository, HistoryRepository};
use register_server::sync::SyncWorker;

/// 回滚记录过期清理间隔
const ROLLBACK_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 环境与日志
    dotenv::dotenv().ok();
    register_server::init_logger();

    tracing::info!("Register server starting...");

    // 2. 配置 + 状态
    let config = Config::from_env();
    let state = RegisterState::initialize(config).await?;

    // 3. 后台任务
    let mut tasks = BackgroundTasks::new();

    // 每个注册的同步目标一个排空 worker (single-flight per type)
    for target in state.sync_targets() {
        let worker = SyncWorker::new(
            AfterhandlerRepository::new(state.db.clone()),
            HistoryRepository::new(state.db.clone()),
            target,
            Duration::from_millis(state.config.sync_poll_ms),
            tasks.shutdown_token(),
        );
        tasks.spawn("sync_worker_elastic", TaskKind::Worker, async move {
            worker.run().await;
        });
    }

    // 过期回滚记录清理
    {
        let store = state.rollback_store.clone();
        let shutdown = tasks.shutdown_token();
        tasks.spawn("rollback_sweeper", TaskKind::Periodic, async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(ROLLBACK_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match store.sweep_expired().await {
                            Ok(0) => {}
                            Ok(n) => tracing::debug!(swept = n, "Expired rollback records removed"),
                            Err(e) => tracing::error!("Rollback sweep failed: {e}"),
                        }
                    }
                }
            }
        });
    }

    tasks.log_summary();
    tracing::info!("Register server ready");

    // 4. 等待退出信号，优雅关闭
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    tasks.shutdown().await;

    Ok(())
}
