use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

/// In-memory allow/block lists for client IP addresses.
///
/// Mutations are idempotent and take effect for the next decision that
/// consults the lists. The allow list is a trusted-source override: an
/// allow-listed IP bypasses both blocking and rate limiting.
pub struct IpAccessList {
    /// Blocked IPs mapped to the reason they were blocked
    blocked: RwLock<HashMap<String, String>>,
    /// IPs exempt from blocking and rate limiting
    allowed: RwLock<HashSet<String>>,
}

impl IpAccessList {
    /// Create an empty access list
    pub fn new() -> Self {
        Self::with_lists(HashSet::new(), HashSet::new())
    }

    /// Create an access list seeded from configuration
    pub fn with_lists(blocked: HashSet<String>, allowed: HashSet<String>) -> Self {
        Self {
            blocked: RwLock::new(
                blocked
                    .into_iter()
                    .map(|ip| (ip, "configured".to_string()))
                    .collect(),
            ),
            allowed: RwLock::new(allowed),
        }
    }

    /// Block an IP. Re-blocking an already blocked IP updates the reason.
    pub async fn block(&self, ip: &str, reason: &str) {
        self.blocked
            .write()
            .await
            .insert(ip.to_string(), reason.to_string());
    }

    /// Remove an IP from the block list
    pub async fn unblock(&self, ip: &str) {
        self.blocked.write().await.remove(ip);
    }

    /// Add an IP to the allow list
    pub async fn allow(&self, ip: &str) {
        self.allowed.write().await.insert(ip.to_string());
    }

    /// Check if an IP is blocked
    pub async fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.read().await.contains_key(ip)
    }

    /// Check if an IP is on the allow list
    pub async fn is_allowed(&self, ip: &str) -> bool {
        self.allowed.read().await.contains(ip)
    }

    /// Get all blocked IPs
    pub async fn blocked_ips(&self) -> Vec<String> {
        self.blocked.read().await.keys().cloned().collect()
    }

    /// Number of currently blocked IPs
    pub async fn blocked_count(&self) -> usize {
        self.blocked.read().await.len()
    }

    /// Replace both lists wholesale (configuration reload)
    pub async fn replace(&self, blocked: HashSet<String>, allowed: HashSet<String>) {
        *self.blocked.write().await = blocked
            .into_iter()
            .map(|ip| (ip, "configured".to_string()))
            .collect();
        *self.allowed.write().await = allowed;
    }
}

impl Default for IpAccessList {
    fn default() -> Self {
        Self::new()
    }
}
