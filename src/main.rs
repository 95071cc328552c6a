mod app;
mod checker;
mod config;
mod core;
mod languages;
mod pool;
mod queue;
mod reporter;
mod sandbox;
mod scheduler;
mod server;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_daemon=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Judge Daemon...");

    let config = Config::from_env()?;
    config.log_summary();
    let grace = config.shutdown_grace;

    let app = App::init(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumer = app.consumer();
    let consumer_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { consumer.run(shutdown, grace).await }
    });

    let server_task = tokio::spawn(server::serve(app.clone(), shutdown_rx));

    wait_for_signal().await;
    info!("Shutdown requested, stopping consumer and HTTP server");
    let _ = shutdown_tx.send(true);
    // Requests still waiting for a slot fail fast instead of starting new work
    app.pool.close();

    // The consumer drains in-flight work within `grace`; allow a little slack
    // on top before giving up on it.
    match tokio::time::timeout(grace + std::time::Duration::from_secs(5), consumer_task).await {
        Ok(Ok(())) => info!("Consumer stopped"),
        Ok(Err(e)) => error!("Consumer task failed: {}", e),
        Err(_) => warn!("Consumer did not stop within the grace period"),
    }

    match tokio::time::timeout(grace, server_task).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!("{:#}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => warn!("HTTP server did not stop within the grace period"),
    }

    info!("Judge Daemon stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
