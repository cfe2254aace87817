use std::env;
use tracing_subscriber::EnvFilter;

/// Initialize the logging system with the specified log level
pub fn init_logging() {
    // Get the log level from environment variable or default to INFO
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    // Create a custom environment filter
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // try_init so test binaries that already installed a subscriber are left alone
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .try_init();
}

/// Log a rate limit check for a quota key
pub fn log_rate_limit(key: &str, exceeded: bool) {
    if exceeded {
        tracing::warn!(
            key = %key,
            event = "rate_limit_exceeded",
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::debug!(
            key = %key,
            event = "rate_limit_check",
            timestamp = %chrono::Utc::now()
        );
    }
}

/// Log a security decision event
pub fn log_security_event(event_type: &str, success: bool, details: Option<&str>) {
    if success {
        tracing::info!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    } else {
        tracing::warn!(
            event_type = %event_type,
            success = %success,
            details = ?details,
            timestamp = %chrono::Utc::now()
        );
    }
}

/// Log an audit retention sweep
pub fn log_audit_prune(removed: usize, remaining: usize) {
    tracing::debug!(
        removed = %removed,
        remaining = %remaining,
        event = "audit_prune"
    );
}
