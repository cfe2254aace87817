use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::utils::log_rate_limit;

/// Rate limit configuration shared by all quota keys
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of requests allowed per window
    pub max_requests: u32,
    /// Length of the counting window
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Window state for a single quota key
#[derive(Debug)]
struct RateLimitEntry {
    /// Requests counted in the current window
    count: u32,
    /// When the current window ends
    reset_at: Instant,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window ends
    pub reset_at: Instant,
}

/// Aggregate counters across all live windows
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RateLimiterStats {
    /// Number of keys with an open window
    pub total_keys: usize,
    /// Sum of request counts across open windows
    pub total_requests: u64,
}

/// Fixed-window rate limiter keyed by arbitrary strings.
///
/// Windows are fixed, not sliding: a client that spends its full quota at
/// the end of one window may spend a fresh quota right after the boundary,
/// so a burst of up to twice `max_requests` can straddle a window edge.
pub struct RateLimiter {
    /// Window state per quota key
    limits: Mutex<HashMap<String, RateLimitEntry>>,
    /// Shared configuration
    config: RwLock<RateLimitConfig>,
}

impl RateLimiter {
    /// Create a new rate limiter instance
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            limits: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
        }
    }

    /// Replace the shared configuration.
    ///
    /// Open windows keep their `reset_at`; ceiling checks read the current
    /// configuration, so a raised limit applies on the next check.
    pub async fn configure(&self, config: RateLimitConfig) {
        *self.config.write().await = config;
    }

    /// Check whether `key` may proceed under its current window quota
    pub async fn check_limit(&self, key: &str) -> RateLimitDecision {
        let config = self.config.read().await.clone();
        let now = Instant::now();
        let mut limits = self.limits.lock().await;

        let entry = limits.entry(key.to_string()).or_insert_with(|| RateLimitEntry {
            count: 0,
            reset_at: now + config.window,
        });

        // An entry whose window has passed is replaced, never incremented
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + config.window;
        }

        let decision = if entry.count >= config.max_requests {
            // Rejected attempts do not consume quota beyond the limit
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: entry.reset_at,
            }
        } else {
            entry.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: config.max_requests - entry.count,
                reset_at: entry.reset_at,
            }
        };

        log_rate_limit(key, !decision.allowed);
        decision
    }

    /// Remove windows that have already ended.
    ///
    /// Expired entries are treated as absent by `check_limit`, so this only
    /// reclaims memory. Returns the number of entries removed.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut limits = self.limits.lock().await;
        let before = limits.len();
        limits.retain(|_, entry| entry.reset_at > now);
        before - limits.len()
    }

    /// Get aggregate counters over live windows
    pub async fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let limits = self.limits.lock().await;

        let mut stats = RateLimiterStats::default();
        for entry in limits.values() {
            if entry.reset_at > now {
                stats.total_keys += 1;
                stats.total_requests += u64::from(entry.count);
            }
        }
        stats
    }
}

/// Rate limiter view keyed by client IP address.
///
/// Pure key namespacing over a shared [`RateLimiter`]; quotas under the
/// `ip:` prefix never collide with user quotas for the same literal string.
pub struct IpRateLimiter {
    inner: Arc<RateLimiter>,
}

impl IpRateLimiter {
    /// Create a new IP-scoped view over a shared rate limiter
    pub fn new(inner: Arc<RateLimiter>) -> Self {
        Self { inner }
    }

    /// Check the quota for an IP address
    pub async fn check_ip_limit(&self, ip: &str) -> RateLimitDecision {
        self.inner.check_limit(&format!("ip:{}", ip)).await
    }
}

/// Rate limiter view keyed by user id
pub struct UserRateLimiter {
    inner: Arc<RateLimiter>,
}

impl UserRateLimiter {
    /// Create a new user-scoped view over a shared rate limiter
    pub fn new(inner: Arc<RateLimiter>) -> Self {
        Self { inner }
    }

    /// Check the quota for a user id
    pub async fn check_user_limit(&self, user_id: &str) -> RateLimitDecision {
        self.inner.check_limit(&format!("user:{}", user_id)).await
    }
}
