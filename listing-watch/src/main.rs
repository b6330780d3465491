use listing_watch::config::AppConfig;
use listing_watch::services::ServiceContainer;
use listing_watch::{database, logging};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir, config.log_filter.as_deref())?;

    // Initialize database
    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &config).await?;
    container.initialize().await?;
    container.start();
    logging_config.start_retention_cleanup(container.cancellation_token());
    #[cfg(unix)]
    spawn_filter_reload(logging_config.clone(), container.cancellation_token())?;

    info!(
        log_dir = %logging_config.log_dir().display(),
        "listing-watch started"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}

/// Re-apply `LOG_FILTER` from the `.env` file on SIGHUP.
#[cfg(unix)]
fn spawn_filter_reload(
    logging_config: std::sync::Arc<logging::LoggingConfig>,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::warn;

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let directive = env_file_filter()
                        .unwrap_or_else(|| logging::DEFAULT_LOG_FILTER.to_string());
                    if let Err(e) = logging_config.set_filter(&directive) {
                        warn!(error = %e, "Keeping previous log filter");
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(unix)]
fn env_file_filter() -> Option<String> {
    dotenvy::dotenv_iter()
        .ok()?
        .filter_map(|entry| entry.ok())
        .find(|(key, value)| key == "LOG_FILTER" && !value.trim().is_empty())
        .map(|(_, value)| value)
}
