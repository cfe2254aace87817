use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use request_security::config::Settings;
use request_security::service::SecurityManager;
use request_security::utils::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    init_logging();
    tracing::info!("Starting request security service...");

    // Load configuration, falling back to env-derived defaults
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!(error = %err, "no APP_ configuration found, using defaults");
            Settings::default()
        }
    };
    tracing::info!(
        max_requests_per_minute = settings.rate_limit.max_requests_per_minute,
        audit_enabled = settings.audit.enabled,
        audit_retention_days = settings.audit.retention_days,
        "Configuration loaded"
    );

    // Wire the service and start the periodic sweeps
    let manager = Arc::new(SecurityManager::new(
        settings.security_config(),
        settings.audit_config(),
    ));
    let cleanup = manager.start_cleanup(
        Duration::from_secs(300),    // rate-limit window sweep
        Duration::from_secs(86_400), // audit retention
    );
    tracing::info!("Request security service initialized successfully");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutting down");
    cleanup.shutdown();

    Ok(())
}
