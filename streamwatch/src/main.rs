use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use streamwatch::config::AppConfig;
use streamwatch::services::ServiceContainer;
use streamwatch::{database, logging, panic_hook};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Configuration errors go to stderr through anyhow; the effective values
    // are logged once the subscriber is up.
    let config = AppConfig::from_env()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);
    info!(?config, "streamwatch {} starting", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &config)?;
    if let Err(e) = container.restore_live_state().await {
        // Not fatal: the first tick will announce whatever is live.
        error!("Failed to restore live state: {}", e);
    }

    let log_token = CancellationToken::new();
    logging_config.start_retention_cleanup(log_token.clone());
    container.start();

    shutdown_signal().await;

    container.shutdown().await?;
    log_token.cancel();
    info!("streamwatch stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
