use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::utils::{log_audit_prune, SecurityError, SecurityResult};

/// Canonical action names recorded in audit entries.
///
/// Reporting and SIEM tooling match on these strings; changing them breaks
/// downstream parsers.
pub mod actions {
    pub const LOGIN: &str = "LOGIN";
    pub const LOGOUT: &str = "LOGOUT";
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const DELETE: &str = "DELETE";
    pub const ACCESS: &str = "ACCESS";
    pub const EXPORT: &str = "EXPORT";
    pub const BLOCKED_IP: &str = "BLOCKED_IP";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
}

/// Value written in place of sensitive detail fields
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Detail keys whose values are never stored. Matched case-insensitively as
/// substrings, so variants like `apiKey` or `refresh_token` are caught too.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "senha",
    "token",
    "secret",
    "key",
    "credential",
    "authorization",
];

/// Authenticated identity on whose behalf an operation runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Stable user identifier
    pub user_id: String,
    /// Email associated with the account
    pub user_email: String,
}

impl Actor {
    /// Create a new actor identity
    pub fn new(user_id: &str, user_email: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
        }
    }
}

/// Best-effort client context captured alongside audit entries.
/// Missing fields degrade to `None`; nothing here ever blocks a caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Client IP address, when the transport layer supplied one
    pub ip_address: Option<String>,
    /// Client user agent, when the transport layer supplied one
    pub user_agent: Option<String>,
}

/// Verbosity of audit capture.
///
/// Accepted and stored but structurally inert for now: every level records
/// the full entry. `Verbose` is the hook for later capturing call stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLogLevel {
    Basic,
    Detailed,
    Verbose,
}

impl FromStr for AuditLogLevel {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "detailed" => Ok(Self::Detailed),
            "verbose" => Ok(Self::Verbose),
            other => Err(SecurityError::InvalidRequest(format!(
                "unknown audit log level: {}",
                other
            ))),
        }
    }
}

/// Audit logger configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Whether events are recorded at all
    pub enabled: bool,
    /// Capture verbosity
    pub log_level: AuditLogLevel,
    /// Maximum number of retained entries
    pub max_entries: usize,
    /// Maximum age of retained entries in days
    pub retention_days: i64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: AuditLogLevel::Basic,
            max_entries: 10_000,
            retention_days: 90,
        }
    }
}

/// A single security-relevant event. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Collision-resistant entry id
    pub id: String,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_email: String,
    /// Canonical action name, see [`actions`]
    pub action: String,
    /// Resource the action targeted
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Sanitized structured payload
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregate counters over the stored entries
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total_logs: usize,
    /// Entries stamped on the current UTC calendar day
    pub logs_today: usize,
    pub unique_users: usize,
    /// User with the most entries; ties keep the user seen first
    pub most_active_user: Option<String>,
    /// Resource with the most entries; ties keep the resource seen first
    pub most_accessed_resource: Option<String>,
}

/// Export payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(SecurityError::InvalidRequest(format!(
                "unknown export format: {}",
                other
            ))),
        }
    }
}

/// Append-only, in-process store of security-relevant events.
///
/// Entries are owned exclusively by this logger and removed only by the
/// retention policy (age cutoff or oldest-first capacity eviction). Nothing
/// in here ever fails a caller's primary operation: a disabled logger is a
/// no-op and a full store prunes instead of rejecting.
pub struct AuditLogger {
    /// Entries in append (= timestamp) order
    logs: RwLock<Vec<AuditLogEntry>>,
    /// Retention and capture configuration
    config: RwLock<AuditConfig>,
}

impl AuditLogger {
    /// Create a new audit logger instance
    pub fn new(config: AuditConfig) -> Self {
        Self {
            logs: RwLock::new(Vec::new()),
            config: RwLock::new(config),
        }
    }

    /// Toggle event capture at runtime
    pub async fn set_enabled(&self, enabled: bool) {
        self.config.write().await.enabled = enabled;
    }

    /// Append an audit entry.
    ///
    /// Sensitive detail fields are redacted before the entry is stored. If
    /// the append pushes the store past its capacity, the oldest entries are
    /// pruned inline.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: Option<&str>,
        details: Value,
        success: bool,
        error_message: Option<&str>,
        ctx: &RequestContext,
    ) {
        let (enabled, max_entries) = {
            let config = self.config.read().await;
            (config.enabled, config.max_entries)
        };
        if !enabled {
            return;
        }

        let entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: actor.user_id.clone(),
            user_email: actor.user_email.clone(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: resource_id.map(str::to_string),
            details: sanitize_details(details),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            success,
            error_message: error_message.map(str::to_string),
        };

        let mut logs = self.logs.write().await;
        logs.push(entry);
        if logs.len() > max_entries {
            let excess = logs.len() - max_entries;
            logs.drain(..excess);
            log_audit_prune(excess, logs.len());
        }
    }

    /// Record a successful login
    pub async fn log_login(&self, actor: &Actor, ctx: &RequestContext) {
        self.log(actor, actions::LOGIN, "auth", None, json!({}), true, None, ctx)
            .await;
    }

    /// Record a logout
    pub async fn log_logout(&self, actor: &Actor, ctx: &RequestContext) {
        self.log(actor, actions::LOGOUT, "auth", None, json!({}), true, None, ctx)
            .await;
    }

    /// Record creation of a resource
    pub async fn log_create(
        &self,
        actor: &Actor,
        resource: &str,
        resource_id: &str,
        details: Value,
        ctx: &RequestContext,
    ) {
        self.log(
            actor,
            actions::CREATE,
            resource,
            Some(resource_id),
            details,
            true,
            None,
            ctx,
        )
        .await;
    }

    /// Record an update to a resource
    pub async fn log_update(
        &self,
        actor: &Actor,
        resource: &str,
        resource_id: &str,
        details: Value,
        ctx: &RequestContext,
    ) {
        self.log(
            actor,
            actions::UPDATE,
            resource,
            Some(resource_id),
            details,
            true,
            None,
            ctx,
        )
        .await;
    }

    /// Record deletion of a resource
    pub async fn log_delete(
        &self,
        actor: &Actor,
        resource: &str,
        resource_id: &str,
        ctx: &RequestContext,
    ) {
        self.log(
            actor,
            actions::DELETE,
            resource,
            Some(resource_id),
            json!({}),
            true,
            None,
            ctx,
        )
        .await;
    }

    /// Record read access to a resource
    pub async fn log_access(&self, actor: &Actor, resource: &str, ctx: &RequestContext) {
        self.log(actor, actions::ACCESS, resource, None, json!({}), true, None, ctx)
            .await;
    }

    /// Record a data export
    pub async fn log_export(
        &self,
        actor: &Actor,
        resource: &str,
        format: &str,
        ctx: &RequestContext,
    ) {
        self.log(
            actor,
            actions::EXPORT,
            resource,
            None,
            json!({ "format": format }),
            true,
            None,
            ctx,
        )
        .await;
    }

    /// Entries for a user, newest first, at most `limit`
    pub async fn logs_by_user(&self, user_id: &str, limit: usize) -> Vec<AuditLogEntry> {
        let logs = self.logs.read().await;
        let mut matched: Vec<AuditLogEntry> = logs
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        matched
    }

    /// Entries for a resource, newest first, at most `limit`
    pub async fn logs_by_resource(&self, resource: &str, limit: usize) -> Vec<AuditLogEntry> {
        let logs = self.logs.read().await;
        let mut matched: Vec<AuditLogEntry> = logs
            .iter()
            .filter(|entry| entry.resource == resource)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(limit);
        matched
    }

    /// Entries with `start <= timestamp <= end`, in insertion order.
    ///
    /// Unlike the user/resource queries this does not sort; callers that
    /// need newest-first order sort the result themselves.
    pub async fn logs_by_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AuditLogEntry> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|entry| entry.timestamp >= start && entry.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Get aggregate counters over the stored entries
    pub async fn stats(&self) -> AuditStats {
        let logs = self.logs.read().await;
        let today = Utc::now().date_naive();

        let logs_today = logs
            .iter()
            .filter(|entry| entry.timestamp.date_naive() == today)
            .count();
        let unique_users: HashSet<&str> = logs.iter().map(|entry| entry.user_id.as_str()).collect();

        AuditStats {
            total_logs: logs.len(),
            logs_today,
            unique_users: unique_users.len(),
            most_active_user: top_by_count(logs.iter().map(|entry| entry.user_id.as_str())),
            most_accessed_resource: top_by_count(logs.iter().map(|entry| entry.resource.as_str())),
        }
    }

    /// Export all entries as a plain text payload.
    ///
    /// JSON is a pretty-printed dump of full entries. CSV is a deliberately
    /// narrow surface: seven fixed columns, no details, client context,
    /// resource id or error text.
    pub async fn export(&self, format: ExportFormat) -> SecurityResult<String> {
        let logs = self.logs.read().await;
        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&*logs)?),
            ExportFormat::Csv => {
                let mut out = String::from("ID,Timestamp,User ID,User Email,Action,Resource,Success\n");
                for entry in logs.iter() {
                    out.push_str(&format!(
                        "{},{},{},{},{},{},{}\n",
                        csv_field(&entry.id),
                        entry.timestamp.to_rfc3339(),
                        csv_field(&entry.user_id),
                        csv_field(&entry.user_email),
                        csv_field(&entry.action),
                        csv_field(&entry.resource),
                        entry.success,
                    ));
                }
                Ok(out)
            }
        }
    }

    /// Apply the retention policy: drop entries older than the configured
    /// age, then trim to capacity. Returns the number of entries removed.
    pub async fn cleanup(&self) -> usize {
        let retention_days = self.config.read().await.retention_days;
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        self.cleanup_before(cutoff).await
    }

    /// Remove entries older than `cutoff`, then enforce the capacity limit
    /// keeping the most recent entries. Idempotent; safe to run while
    /// decisions are in flight.
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let max_entries = self.config.read().await.max_entries;
        let mut logs = self.logs.write().await;
        let before = logs.len();

        logs.retain(|entry| entry.timestamp >= cutoff);
        if logs.len() > max_entries {
            // Entries are appended in timestamp order, so the oldest sit at the front
            let excess = logs.len() - max_entries;
            logs.drain(..excess);
        }

        let removed = before - logs.len();
        if removed > 0 {
            log_audit_prune(removed, logs.len());
        }
        removed
    }
}

/// Replace values of credential-bearing keys before an entry is stored.
/// Recurses through nested objects and arrays; scalars carry no key to
/// match against and pass through unchanged.
fn sanitize_details(details: Value) -> Value {
    match details {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, sanitize_details(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_details).collect()),
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

/// Highest-count value in `values`; ties keep the value seen first
fn top_by_count<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value.to_string())
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| c == ',' || c == '"' || c == '\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
