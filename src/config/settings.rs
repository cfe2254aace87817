use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::core::{AuditConfig, AuditLogLevel};
use crate::service::SecurityConfig;

/// Configuration settings for the request security service
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Rate limiting configuration
    pub rate_limit: RateLimitSettings,
    /// Audit log configuration
    pub audit: AuditSettings,
    /// Security policy configuration
    pub security: SecuritySettings,
}

/// Rate limiting configuration settings
#[derive(Debug, Deserialize)]
pub struct RateLimitSettings {
    /// Per-key request ceiling within a one-minute window
    pub max_requests_per_minute: u32,
    /// Reserved hourly ceiling, not yet enforced
    pub max_requests_per_hour: u32,
}

/// Audit log configuration settings
#[derive(Debug, Deserialize)]
pub struct AuditSettings {
    /// Whether events are recorded
    pub enabled: bool,
    /// Capture verbosity
    pub log_level: AuditLogLevel,
    /// Maximum number of retained entries
    pub max_entries: usize,
    /// Maximum age of retained entries in days
    pub retention_days: i64,
}

/// Security policy configuration settings
#[derive(Debug, Deserialize)]
pub struct SecuritySettings {
    /// Whether quotas are enforced
    pub rate_limit_enabled: bool,
    /// IPs denied outright
    pub blocked_ips: Vec<String>,
    /// Trusted IPs exempt from blocking and rate limiting
    pub allowed_ips: Vec<String>,
}

impl Settings {
    /// Load configuration from environment variables and config files
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        // Add environment variables with prefix "APP_"; nested sections are
        // addressed with a double underscore (APP_AUDIT__MAX_ENTRIES)
        let mut builder = config::Config::builder();
        builder = builder.add_source(config::Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Translate into the runtime security policy
    pub fn security_config(&self) -> SecurityConfig {
        SecurityConfig {
            rate_limit_enabled: self.security.rate_limit_enabled,
            audit_log_enabled: self.audit.enabled,
            max_requests_per_minute: self.rate_limit.max_requests_per_minute,
            max_requests_per_hour: self.rate_limit.max_requests_per_hour,
            blocked_ips: self.security.blocked_ips.iter().cloned().collect(),
            allowed_ips: self.security.allowed_ips.iter().cloned().collect(),
        }
    }

    /// Translate into the audit logger configuration
    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            enabled: self.audit.enabled,
            log_level: self.audit.log_level,
            max_entries: self.audit.max_entries,
            retention_days: self.audit.retention_days,
        }
    }
}

/// Default values for configuration settings
impl Default for Settings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings {
                max_requests_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 100),
                max_requests_per_hour: env_or("RATE_LIMIT_PER_HOUR", 2000),
            },
            audit: AuditSettings {
                enabled: env_or("AUDIT_ENABLED", true),
                log_level: env_or("AUDIT_LOG_LEVEL", AuditLogLevel::Basic),
                max_entries: env_or("AUDIT_MAX_ENTRIES", 10_000),
                retention_days: env_or("AUDIT_RETENTION_DAYS", 90),
            },
            security: SecuritySettings {
                rate_limit_enabled: env_or("RATE_LIMIT_ENABLED", true),
                blocked_ips: env_ip_list("BLOCKED_IPS"),
                allowed_ips: env_ip_list("ALLOWED_IPS"),
            },
        }
    }
}

/// Read an environment variable, falling back to `default` when it is
/// missing or unparsable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Read a comma-separated IP list from an environment variable
fn env_ip_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
