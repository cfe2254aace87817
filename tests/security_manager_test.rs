use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use request_security::core::{actions, Actor, AuditConfig, RequestContext};
use request_security::service::{
    PermissionChecker, SecurityConfig, SecurityManager,
};
use request_security::utils::{SecurityError, SecurityResult};

mod test_utils;
use test_utils::random_ip;

fn manager_with_limit(per_minute: u32) -> SecurityManager {
    SecurityManager::new(
        SecurityConfig {
            max_requests_per_minute: per_minute,
            ..SecurityConfig::default()
        },
        AuditConfig::default(),
    )
}

fn actor() -> Actor {
    Actor::new("u1", "u1@example.com")
}

fn ctx_from(ip: &str) -> RequestContext {
    RequestContext {
        ip_address: Some(ip.to_string()),
        user_agent: Some("test-agent".to_string()),
    }
}

mockall::mock! {
    Checker {}

    #[async_trait]
    impl PermissionChecker for Checker {
        async fn is_allowed(
            &self,
            actor: &Actor,
            action: &str,
            resource: &str,
        ) -> SecurityResult<bool>;
    }
}

struct FailingChecker;

#[async_trait]
impl PermissionChecker for FailingChecker {
    async fn is_allowed(
        &self,
        _actor: &Actor,
        _action: &str,
        _resource: &str,
    ) -> SecurityResult<bool> {
        Err(SecurityError::PermissionCheck(
            "policy backend offline".to_string(),
        ))
    }
}

#[tokio::test]
async fn blocked_ip_is_denied_regardless_of_quota() {
    let manager = manager_with_limit(100);
    manager.block_ip("9.9.9.9", "abuse reports").await;

    let decision = manager
        .check_request(&actor(), "VIEW", "relatorio", &ctx_from("9.9.9.9"))
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap().contains("blocked"));

    let stats = manager.security_stats().await;
    assert_eq!(stats.blocked_requests, 1);
    assert_eq!(stats.blocked_ips, 1);
    // the denial itself is on the audit trail
    assert_eq!(stats.audit.total_logs, 1);

    let entries = manager.audit_log().logs_by_user("u1", 10).await;
    assert_eq!(entries[0].action, actions::BLOCKED_IP);
    assert!(!entries[0].success);
}

#[tokio::test]
async fn unblocking_restores_access() {
    let manager = manager_with_limit(100);
    manager.block_ip("9.9.9.9", "abuse reports").await;
    manager.unblock_ip("9.9.9.9").await;

    let decision = manager
        .check_request(&actor(), "VIEW", "relatorio", &ctx_from("9.9.9.9"))
        .await;
    assert!(decision.allowed);
    assert_eq!(manager.security_stats().await.blocked_ips, 0);
}

#[test_log::test(tokio::test)]
async fn request_quota_allows_then_denies_and_audits_every_outcome() {
    let manager = manager_with_limit(2);
    let ctx = ctx_from(&random_ip());

    let first = manager
        .check_request(&actor(), "VIEW", "relatorio", &ctx)
        .await;
    let second = manager
        .check_request(&actor(), "VIEW", "relatorio", &ctx)
        .await;
    let third = manager
        .check_request(&actor(), "VIEW", "relatorio", &ctx)
        .await;

    assert!(first.allowed);
    assert_eq!(first.remaining, Some(1));
    assert!(second.allowed);
    assert_eq!(second.remaining, Some(0));
    assert!(!third.allowed);

    let stats = manager.security_stats().await;
    assert_eq!(stats.audit.total_logs, 3);
    assert_eq!(stats.rate_limit_hits, 1);

    let entries = manager.audit_log().logs_by_user("u1", 10).await;
    let accesses = entries.iter().filter(|e| e.action == actions::ACCESS).count();
    let limited = entries
        .iter()
        .filter(|e| e.action == actions::RATE_LIMIT_EXCEEDED)
        .count();
    assert_eq!(accesses, 2);
    assert_eq!(limited, 1);
}

#[tokio::test]
async fn login_ceiling_blocks_even_unseen_users() {
    let manager = manager_with_limit(2);
    let ctx = ctx_from("5.5.5.5");

    assert!(manager.check_login("a@example.com", &ctx).await.allowed);
    assert!(manager.check_login("b@example.com", &ctx).await.allowed);

    // Same address, never-seen account: the IP bucket is what counts
    let third = manager.check_login("c@example.com", &ctx).await;
    assert!(!third.allowed);
    assert!(third.reason.unwrap().contains("login attempts"));
}

#[tokio::test]
async fn login_and_request_quotas_are_separate_buckets() {
    let manager = manager_with_limit(1);
    let ctx = ctx_from("7.7.7.7");

    assert!(manager
        .check_request(&actor(), "VIEW", "obra", &ctx)
        .await
        .allowed);
    // user quota spent; the login check draws from the ip bucket instead
    assert!(manager.check_login("u1@example.com", &ctx).await.allowed);
}

#[tokio::test]
async fn successful_login_check_leaves_no_audit_entry() {
    let manager = manager_with_limit(5);
    assert!(manager
        .check_login("a@example.com", &ctx_from("1.1.1.1"))
        .await
        .allowed);

    assert_eq!(manager.security_stats().await.audit.total_logs, 0);
}

#[tokio::test]
async fn allow_listed_ip_bypasses_blocking_and_quota() {
    let manager = manager_with_limit(1);
    manager.allow_ip("8.8.8.8").await;
    manager.block_ip("8.8.8.8", "should be overridden").await;

    for _ in 0..5 {
        let decision = manager
            .check_request(&actor(), "VIEW", "obra", &ctx_from("8.8.8.8"))
            .await;
        assert!(decision.allowed);
    }
    // trusted traffic is still audited
    assert_eq!(manager.security_stats().await.audit.total_logs, 5);
}

#[tokio::test]
async fn missing_ip_degrades_to_user_quota_only() {
    let manager = manager_with_limit(2);
    let ctx = RequestContext::default();

    assert!(manager
        .check_request(&actor(), "VIEW", "obra", &ctx)
        .await
        .allowed);
    // login checks are purely IP-based; without an address they pass
    assert!(manager.check_login("a@example.com", &ctx).await.allowed);
}

#[tokio::test]
async fn permission_denial_is_audited_and_denied() {
    let mut checker = MockChecker::new();
    checker.expect_is_allowed().returning(|_, _, _| Ok(false));

    let manager = SecurityManager::with_permission_checker(
        SecurityConfig::default(),
        AuditConfig::default(),
        Arc::new(checker),
    );

    let decision = manager
        .check_action(
            &actor(),
            actions::DELETE,
            "obra",
            Some("obra-42"),
            json!({}),
            &ctx_from("2.2.2.2"),
        )
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap().contains("Permission denied"));

    let entries = manager.audit_log().logs_by_user("u1", 10).await;
    assert_eq!(entries[0].action, actions::PERMISSION_DENIED);
    assert!(!entries[0].success);
    assert_eq!(entries[0].resource_id.as_deref(), Some("obra-42"));
}

#[tokio::test]
async fn checker_fault_fails_closed() {
    let manager = SecurityManager::with_permission_checker(
        SecurityConfig::default(),
        AuditConfig::default(),
        Arc::new(FailingChecker),
    );

    let decision = manager
        .check_action(
            &actor(),
            actions::UPDATE,
            "obra",
            Some("obra-42"),
            json!({}),
            &ctx_from("2.2.2.2"),
        )
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap().contains("Internal"));
}

#[tokio::test]
async fn allowed_actions_dispatch_to_the_canonical_loggers() {
    let manager = manager_with_limit(100);
    let ctx = ctx_from("3.3.3.3");

    manager
        .check_action(
            &actor(),
            actions::CREATE,
            "documento",
            Some("doc-1"),
            json!({"titulo": "Contrato", "senha": "secreta"}),
            &ctx,
        )
        .await;
    manager
        .check_action(&actor(), "APPROVE", "documento", Some("doc-1"), json!({}), &ctx)
        .await;

    let entries = manager.audit_log().logs_by_resource("documento", 10).await;
    assert_eq!(entries.len(), 2);

    let create = entries
        .iter()
        .find(|e| e.action == actions::CREATE)
        .expect("CREATE entry");
    assert_eq!(create.resource_id.as_deref(), Some("doc-1"));
    assert_eq!(create.details["titulo"], "Contrato");
    // sanitization applies on the action path too
    assert_eq!(create.details["senha"], "[REDACTED]");

    // unrecognized actions fall through to the generic logger verbatim
    assert!(entries.iter().any(|e| e.action == "APPROVE" && e.success));
}

#[tokio::test]
async fn configure_swaps_the_active_policy() {
    let manager = manager_with_limit(100);

    let mut blocked = HashSet::new();
    blocked.insert("6.6.6.6".to_string());
    manager
        .configure(SecurityConfig {
            max_requests_per_minute: 1,
            blocked_ips: blocked,
            ..SecurityConfig::default()
        })
        .await;

    let denied = manager
        .check_request(&actor(), "VIEW", "obra", &ctx_from("6.6.6.6"))
        .await;
    assert!(!denied.allowed);

    // new per-minute ceiling applies to fresh keys
    let other = Actor::new("u2", "u2@example.com");
    let ctx = ctx_from("4.4.4.4");
    assert!(manager.check_request(&other, "VIEW", "obra", &ctx).await.allowed);
    assert!(!manager.check_request(&other, "VIEW", "obra", &ctx).await.allowed);
}

#[tokio::test]
async fn disabling_rate_limiting_skips_the_quota_gate() {
    let manager = manager_with_limit(1);
    manager
        .configure(SecurityConfig {
            rate_limit_enabled: false,
            max_requests_per_minute: 1,
            ..SecurityConfig::default()
        })
        .await;

    let ctx = ctx_from(&random_ip());
    for _ in 0..4 {
        assert!(manager
            .check_request(&actor(), "VIEW", "obra", &ctx)
            .await
            .allowed);
    }
}

#[tokio::test(start_paused = true)]
async fn cleanup_tasks_start_and_shut_down_cleanly() {
    let manager = manager_with_limit(5);
    manager
        .check_request(&actor(), "VIEW", "obra", &ctx_from("1.2.3.4"))
        .await;

    let handle = manager.start_cleanup(Duration::from_secs(120), Duration::from_secs(3600));
    tokio::time::advance(Duration::from_secs(121)).await;
    tokio::task::yield_now().await;
    handle.shutdown();

    // the manager stays fully usable after the sweeps stop
    assert!(manager
        .check_request(&actor(), "VIEW", "obra", &ctx_from("1.2.3.4"))
        .await
        .allowed);
}
