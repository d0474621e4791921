use std::sync::Arc;

use newsgate_worker::{build_scheduler, init_tracing, Runtime};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(newsgate_core::load_app_config()?);
    init_tracing(&config)?;

    let pool_config = newsgate_db::PoolConfig::from_app_config(&config);
    let pool = newsgate_db::connect_pool(&config.database_url, pool_config).await?;
    newsgate_db::run_migrations(&pool).await?;

    let runtime = Runtime::new(Arc::clone(&config), pool).await?;
    let mut scheduler = build_scheduler(&runtime).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = runtime
        .workers()
        .into_iter()
        .map(|worker| {
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect();
    tracing::info!(
        workers = handles.len(),
        schedule = %config.fetch_schedule,
        "newsgate worker running"
    );

    shutdown_signal().await;
    // Receivers outlive this send; an error only means every worker already exited.
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler did not shut down cleanly");
    }
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "worker task panicked");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
