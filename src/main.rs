use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use trust_engine::{config::sanitize_for_logging, EngineConfig, Store, TrustService};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check the TRUST_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting trust engine");
    info!(
        postgres_enabled = config.database.postgres_enabled,
        url = %sanitize_for_logging(&config.database.postgres_url),
        cache_ttl_secs = config.cache.ttl_secs,
        badges = config.badges.len(),
        "Configuration loaded"
    );

    let store = Store::open(&config.database)
        .await
        .context("Failed to open store")?;
    let service = TrustService::new(store.clone(), &config).context("Failed to build trust service")?;

    run_until_shutdown(&service, &config).await;

    service.history_recorder().flush().await;
    store.close().await;
    info!("Trust engine stopped");
    Ok(())
}

/// Periodic inactivity sweep; SIGHUP reloads scoring configuration
async fn run_until_shutdown(service: &TrustService, config: &EngineConfig) {
    let period = Duration::from_secs(config.inactivity.sweep_interval_secs.max(1));
    let mut sweep = tokio::time::interval(period);
    info!(interval_secs = period.as_secs(), "Inactivity sweep scheduled");

    #[cfg(unix)]
    let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!(error = %e, "Could not install SIGHUP handler, config reload disabled");
            None
        }
    };

    loop {
        #[cfg(unix)]
        let reload = async {
            match hangup.as_mut() {
                Some(signal) => signal.recv().await,
                None => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = sweep.tick() => {
                if let Err(e) = service.run_inactivity_sweep().await {
                    error!(error = %e, "Inactivity sweep failed");
                }
            }
            _ = reload => {
                let version = service.config_provider().reload_from_env();
                info!(version, "Configuration reload requested");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

fn init_logging(config: &EngineConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
