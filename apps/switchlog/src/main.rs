//! 设备开关状态监测进程：轮询云端设备状态，只把状态变化写入 Postgres。

use std::sync::Arc;
use switchlog_cloud::{ApiClient, ApiClientConfig, Credentials, DeviceStatusSource};
use switchlog_config::AppConfig;
use switchlog_monitor::{PollingLoop, SystemClock};
use switchlog_storage::{PgStatusStore, connect_pool};
use switchlog_telemetry::{init_tracing, metrics};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置；缺失凭据在进入循环前直接退出
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // Postgres 状态存储（表结构见 sql/schema.sql）
    let pool = connect_pool(&config.database_url).await?;
    let store = Arc::new(PgStatusStore::new(pool));

    // 签名客户端：进程内唯一，持有凭据与 token 存储
    let client = Arc::new(ApiClient::with_config(
        credentials(&config),
        client_config(&config),
    )?);
    let source = Arc::new(DeviceStatusSource::new(client, config.switch_code.clone()));

    let mut monitor = PollingLoop::new(
        source,
        store,
        Arc::new(SystemClock),
        config.device_ids.clone(),
        config.poll_interval(),
    )?;

    info!(
        devices = ?config.device_ids,
        interval_seconds = config.poll_interval_seconds,
        switch_code = %config.switch_code,
        "switchlog_starting"
    );

    // Ctrl+C 只翻转停机信号，当前设备处理完后循环自行退出
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let worker = tokio::spawn(async move {
        monitor.run(shutdown_rx).await;
        monitor
    });
    let monitor = worker.await?;

    let snapshot = metrics().snapshot();
    info!(
        ticks = monitor.ticks(),
        polls = snapshot.polls,
        fetch_failures = snapshot.fetch_failures,
        unknown_states = snapshot.unknown_states,
        transitions_written = snapshot.transitions_written,
        already_current = snapshot.already_current,
        persist_failures = snapshot.persist_failures,
        token_acquisitions = snapshot.token_acquisitions,
        token_refreshes = snapshot.token_refreshes,
        "switchlog_stopped"
    );
    Ok(())
}

/// 等待停机信号并翻转 `tx`。
///
/// 信号监听失败时只记日志并继续持有发送端，循环照常运行。
async fn forward_shutdown<F>(signal: F, tx: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutdown_requested");
            let _ = tx.send(true);
        }
        Err(err) => {
            warn!(error = %err, "ctrl_c_listener_failed");
            std::future::pending::<()>().await;
            drop(tx);
        }
    }
}

fn credentials(config: &AppConfig) -> Credentials {
    Credentials {
        access_id: config.access_id.clone(),
        access_secret: config.access_secret.clone(),
        endpoint: config.api_endpoint.clone(),
    }
}

fn client_config(config: &AppConfig) -> ApiClientConfig {
    ApiClientConfig {
        timeout: config.http_timeout(),
        refresh_skew_seconds: i64::try_from(config.token_refresh_skew_seconds).unwrap_or(i64::MAX),
    }
}
