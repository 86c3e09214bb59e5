use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transq_scheduler::{Scheduler, SharedPreferences};
use transq_server::config::ServerConfig;
use transq_server::state::{AppState, ServerEvent};
use transq_transcoder::{FfmpegHardwareProbe, FfmpegRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!(
        ffmpeg = %config.transcoder.ffmpeg_path.display(),
        policy = ?config.policy,
        "configuration loaded"
    );

    let probe = FfmpegHardwareProbe::new(&config.transcoder);
    let runner = Arc::new(FfmpegRunner::new(config.transcoder.clone()));
    let preferences = Arc::new(SharedPreferences::new(config.policy.clone()));
    let scheduler = Arc::new(
        Scheduler::start(
            config.scheduler.clone(),
            runner,
            &probe,
            preferences.clone(),
        )
        .await,
    );

    // Event broadcast channel
    let (events_tx, _) = tokio::sync::broadcast::channel::<ServerEvent>(256);

    let app_state = AppState::new(scheduler.clone(), preferences, events_tx.clone());
    let shutdown = app_state.shutdown.clone();

    // Spawn heartbeat emitter
    {
        let tx = events_tx;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut seq = 0u64;
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let _ = tx.send(ServerEvent::Heartbeat {
                    seq,
                    ts: chrono::Utc::now(),
                });
                seq += 1;
            }
        });
    }

    let app = transq_server::routes::build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            // Open event streams would otherwise hold the connection drain forever.
            shutdown.cancel();
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}
