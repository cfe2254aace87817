use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::core::{
    actions, Actor, AuditConfig, AuditLogger, AuditStats, ExportFormat, IpAccessList,
    IpRateLimiter, RateLimitConfig, RateLimiter, RateLimiterStats, RequestContext,
    UserRateLimiter,
};
use crate::utils::{log_security_event, SecurityResult};

const REASON_IP_BLOCKED: &str = "IP address is blocked";
const REASON_RATE_LIMITED: &str = "Rate limit exceeded";
const REASON_LOGIN_RATE_LIMITED: &str = "Too many login attempts";
const REASON_PERMISSION_DENIED: &str = "Permission denied";
const REASON_INTERNAL: &str = "Internal security error";

/// Runtime security policy. Last write wins; every decision call reads the
/// current value.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Whether request and login quotas are enforced
    pub rate_limit_enabled: bool,
    /// Whether decisions are recorded in the audit log
    pub audit_log_enabled: bool,
    /// Per-key request ceiling within a one-minute window
    pub max_requests_per_minute: u32,
    /// Reserved hourly ceiling. Carried in the configuration surface but
    /// not yet wired to a second window tier.
    pub max_requests_per_hour: u32,
    /// IPs denied outright
    pub blocked_ips: HashSet<String>,
    /// Trusted IPs exempt from blocking and rate limiting
    pub allowed_ips: HashSet<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            audit_log_enabled: true,
            max_requests_per_minute: 100,
            max_requests_per_hour: 2000,
            blocked_ips: HashSet::new(),
            allowed_ips: HashSet::new(),
        }
    }
}

/// Outcome of a security decision.
///
/// Denial is a normal value carrying a human-readable reason, never an
/// error. The caller translates it into an HTTP status or UI message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Requests left in the current window, when a quota was consulted
    pub remaining: Option<u32>,
}

impl Decision {
    /// An allowed decision with no quota information
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining: None,
        }
    }

    /// An allowed decision carrying the remaining quota
    pub fn allow_remaining(remaining: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining: Some(remaining),
        }
    }

    /// A denied decision with a reason
    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            remaining: None,
        }
    }
}

/// Pluggable permission policy consulted by [`SecurityManager::check_action`]
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `actor` may perform `action` on `resource`
    async fn is_allowed(&self, actor: &Actor, action: &str, resource: &str)
        -> SecurityResult<bool>;
}

/// Default policy: every authenticated actor may perform every action.
/// Deliberately permissive; role-based policy plugs in here.
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn is_allowed(
        &self,
        _actor: &Actor,
        _action: &str,
        _resource: &str,
    ) -> SecurityResult<bool> {
        Ok(true)
    }
}

/// Aggregated snapshot across the security components
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub rate_limiter: RateLimiterStats,
    pub audit: AuditStats,
    pub blocked_ips: usize,
    /// Requests denied because their IP was blocked
    pub blocked_requests: u64,
    /// Requests denied because a quota was exhausted
    pub rate_limit_hits: u64,
}

/// Handle for the background cleanup tasks.
///
/// Sweeps run only between `start_cleanup` and `shutdown`; nothing is
/// spawned at construction time.
pub struct CleanupHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Stop the background sweeps
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Single decision point for "is this allowed", composing IP policy, rate
/// limiting and audit logging.
///
/// One rate limiter instance backs both quota namespaces: login checks run
/// against `ip:` keys, request checks against `user:` keys. Every decision
/// path writes its outcome through the audit logger; no component calls
/// back into this manager.
pub struct SecurityManager {
    /// Active policy
    config: RwLock<SecurityConfig>,
    /// Shared window state behind both namespaced views
    rate_limiter: Arc<RateLimiter>,
    /// `ip:` namespaced quota view (login attempts)
    ip_limiter: IpRateLimiter,
    /// `user:` namespaced quota view (request throttling)
    user_limiter: UserRateLimiter,
    /// Audit event store
    audit: Arc<AuditLogger>,
    /// Blocked / allowed IP lists
    ip_list: IpAccessList,
    /// Pluggable permission policy
    permissions: Arc<dyn PermissionChecker>,
    /// Requests denied at the blocked-IP gate
    blocked_requests: AtomicU64,
    /// Requests denied at a quota gate
    rate_limit_hits: AtomicU64,
}

impl SecurityManager {
    /// Create a security manager with the default permissive policy
    pub fn new(config: SecurityConfig, audit_config: AuditConfig) -> Self {
        Self::with_permission_checker(config, audit_config, Arc::new(AllowAll))
    }

    /// Create a security manager with an explicit permission policy
    pub fn with_permission_checker(
        config: SecurityConfig,
        audit_config: AuditConfig,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests: config.max_requests_per_minute,
            window: Duration::from_secs(60),
        }));
        let audit = Arc::new(AuditLogger::new(AuditConfig {
            enabled: config.audit_log_enabled,
            ..audit_config
        }));
        let ip_list =
            IpAccessList::with_lists(config.blocked_ips.clone(), config.allowed_ips.clone());

        Self {
            ip_limiter: IpRateLimiter::new(Arc::clone(&rate_limiter)),
            user_limiter: UserRateLimiter::new(Arc::clone(&rate_limiter)),
            rate_limiter,
            audit,
            ip_list,
            permissions,
            config: RwLock::new(config),
            blocked_requests: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
        }
    }

    /// Replace the active policy.
    ///
    /// Translates the per-minute ceiling into the limiter window, swaps the
    /// IP lists and toggles audit capture; takes effect for all subsequent
    /// decisions.
    pub async fn configure(&self, config: SecurityConfig) {
        self.rate_limiter
            .configure(RateLimitConfig {
                max_requests: config.max_requests_per_minute,
                window: Duration::from_secs(60),
            })
            .await;
        self.audit.set_enabled(config.audit_log_enabled).await;
        self.ip_list
            .replace(config.blocked_ips.clone(), config.allowed_ips.clone())
            .await;
        *self.config.write().await = config;
    }

    /// Decide whether `actor` may perform `action` on `resource` right now.
    ///
    /// Fails closed: an internal fault during evaluation denies the request.
    pub async fn check_request(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        ctx: &RequestContext,
    ) -> Decision {
        match self.evaluate_request(actor, resource, ctx).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, action, resource, "request check failed");
                Decision::deny(REASON_INTERNAL)
            }
        }
    }

    async fn evaluate_request(
        &self,
        actor: &Actor,
        resource: &str,
        ctx: &RequestContext,
    ) -> SecurityResult<Decision> {
        if let Some(ip) = ctx.ip_address.as_deref() {
            // Trusted sources skip both the block list and the quota
            if self.ip_list.is_allowed(ip).await {
                self.audit.log_access(actor, resource, ctx).await;
                return Ok(Decision::allow());
            }
            if self.ip_list.is_blocked(ip).await {
                self.record_blocked(actor, resource, ip, ctx).await;
                return Ok(Decision::deny(REASON_IP_BLOCKED));
            }
        }

        if self.config.read().await.rate_limit_enabled {
            let quota = self.user_limiter.check_user_limit(&actor.user_id).await;
            if !quota.allowed {
                self.record_rate_limited(actor, resource, REASON_RATE_LIMITED, ctx)
                    .await;
                return Ok(Decision::deny(REASON_RATE_LIMITED));
            }
            self.audit.log_access(actor, resource, ctx).await;
            return Ok(Decision::allow_remaining(quota.remaining));
        }

        self.audit.log_access(actor, resource, ctx).await;
        Ok(Decision::allow())
    }

    /// Decide whether `actor` may perform a domain action, and record it.
    ///
    /// Permission checking is delegated to the pluggable policy; on allow,
    /// the action is written to the audit log under its canonical name.
    pub async fn check_action(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: Option<&str>,
        details: Value,
        ctx: &RequestContext,
    ) -> Decision {
        match self
            .evaluate_action(actor, action, resource, resource_id, details, ctx)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, action, resource, "action check failed");
                Decision::deny(REASON_INTERNAL)
            }
        }
    }

    async fn evaluate_action(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: Option<&str>,
        details: Value,
        ctx: &RequestContext,
    ) -> SecurityResult<Decision> {
        if !self.permissions.is_allowed(actor, action, resource).await? {
            log_security_event(actions::PERMISSION_DENIED, false, Some(&actor.user_id));
            self.audit
                .log(
                    actor,
                    actions::PERMISSION_DENIED,
                    resource,
                    resource_id,
                    json!({ "action": action }),
                    false,
                    Some(REASON_PERMISSION_DENIED),
                    ctx,
                )
                .await;
            return Ok(Decision::deny(REASON_PERMISSION_DENIED));
        }

        match action {
            actions::CREATE => {
                self.audit
                    .log_create(actor, resource, resource_id.unwrap_or_default(), details, ctx)
                    .await;
            }
            actions::UPDATE => {
                self.audit
                    .log_update(actor, resource, resource_id.unwrap_or_default(), details, ctx)
                    .await;
            }
            actions::DELETE => {
                self.audit
                    .log_delete(actor, resource, resource_id.unwrap_or_default(), ctx)
                    .await;
            }
            actions::EXPORT => {
                let format = details
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                self.audit.log_export(actor, resource, &format, ctx).await;
            }
            other => {
                self.audit
                    .log(actor, other, resource, resource_id, details, true, None, ctx)
                    .await;
            }
        }
        Ok(Decision::allow())
    }

    /// Pre-authentication gate for login attempts.
    ///
    /// The quota is IP-scoped and distinct from the per-user request quota,
    /// so credential stuffing from one address is throttled regardless of
    /// which accounts it targets. A passing check is not audited here: the
    /// session layer records the authoritative LOGIN event once credentials
    /// are actually verified.
    pub async fn check_login(&self, user_email: &str, ctx: &RequestContext) -> Decision {
        match self.evaluate_login(user_email, ctx).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!(error = %err, "login check failed");
                Decision::deny(REASON_INTERNAL)
            }
        }
    }

    async fn evaluate_login(
        &self,
        user_email: &str,
        ctx: &RequestContext,
    ) -> SecurityResult<Decision> {
        // No authenticated id exists yet; the email stands in for both fields
        let actor = Actor::new(user_email, user_email);

        if let Some(ip) = ctx.ip_address.as_deref() {
            if self.ip_list.is_allowed(ip).await {
                return Ok(Decision::allow());
            }
            if self.ip_list.is_blocked(ip).await {
                self.record_blocked(&actor, "auth", ip, ctx).await;
                return Ok(Decision::deny(REASON_IP_BLOCKED));
            }
            if self.config.read().await.rate_limit_enabled {
                let quota = self.ip_limiter.check_ip_limit(ip).await;
                if !quota.allowed {
                    self.record_rate_limited(&actor, "auth", REASON_LOGIN_RATE_LIMITED, ctx)
                        .await;
                    return Ok(Decision::deny(REASON_LOGIN_RATE_LIMITED));
                }
            }
        }

        Ok(Decision::allow())
    }

    /// Block an IP address. Effective immediately for all decisions.
    pub async fn block_ip(&self, ip: &str, reason: &str) {
        self.ip_list.block(ip, reason).await;
        self.config.write().await.blocked_ips.insert(ip.to_string());
        log_security_event("ip_blocked", true, Some(&format!("{} ({})", ip, reason)));
    }

    /// Remove an IP from the block list
    pub async fn unblock_ip(&self, ip: &str) {
        self.ip_list.unblock(ip).await;
        self.config.write().await.blocked_ips.remove(ip);
        log_security_event("ip_unblocked", true, Some(ip));
    }

    /// Mark an IP as trusted, exempting it from blocking and rate limiting
    pub async fn allow_ip(&self, ip: &str) {
        self.ip_list.allow(ip).await;
        self.config.write().await.allowed_ips.insert(ip.to_string());
        log_security_event("ip_allowed", true, Some(ip));
    }

    /// Get all blocked IPs
    pub async fn blocked_ips(&self) -> Vec<String> {
        self.ip_list.blocked_ips().await
    }

    /// Access the audit event store for queries and exports
    pub fn audit_log(&self) -> &AuditLogger {
        &self.audit
    }

    /// Export all audit entries as a plain text payload
    pub async fn export_logs(&self, format: ExportFormat) -> SecurityResult<String> {
        self.audit.export(format).await
    }

    /// Aggregated snapshot across all components
    pub async fn security_stats(&self) -> SecurityStats {
        SecurityStats {
            rate_limiter: self.rate_limiter.stats().await,
            audit: self.audit.stats().await,
            blocked_ips: self.ip_list.blocked_count().await,
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic sweeps: expired rate-limit windows every
    /// `rate_limit_every`, audit retention every `audit_every`.
    ///
    /// Both sweeps are idempotent and safe to run concurrently with
    /// in-flight decisions; a window removed mid-flight is simply recreated
    /// on the next check.
    pub fn start_cleanup(&self, rate_limit_every: Duration, audit_every: Duration) -> CleanupHandle {
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let rate_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rate_limit_every);
            // an interval's first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = rate_limiter.cleanup().await;
                tracing::debug!(removed, event = "rate_limit_sweep");
            }
        });

        let audit = Arc::clone(&self.audit);
        let audit_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(audit_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                audit.cleanup().await;
            }
        });

        CleanupHandle {
            tasks: vec![rate_task, audit_task],
        }
    }

    async fn record_blocked(&self, actor: &Actor, resource: &str, ip: &str, ctx: &RequestContext) {
        self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("security_requests_blocked_total");
        log_security_event(actions::BLOCKED_IP, false, Some(ip));
        self.audit
            .log(
                actor,
                actions::BLOCKED_IP,
                resource,
                None,
                json!({ "ip": ip }),
                false,
                Some(REASON_IP_BLOCKED),
                ctx,
            )
            .await;
    }

    async fn record_rate_limited(
        &self,
        actor: &Actor,
        resource: &str,
        reason: &str,
        ctx: &RequestContext,
    ) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("security_rate_limit_hits_total");
        log_security_event(actions::RATE_LIMIT_EXCEEDED, false, Some(&actor.user_id));
        self.audit
            .log(
                actor,
                actions::RATE_LIMIT_EXCEEDED,
                resource,
                None,
                json!({}),
                false,
                Some(reason),
                ctx,
            )
            .await;
    }
}
