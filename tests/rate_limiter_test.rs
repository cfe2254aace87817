use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use request_security::core::{
    IpRateLimiter, RateLimitConfig, RateLimiter, UserRateLimiter,
};

fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        max_requests,
        window: Duration::from_secs(window_secs),
    })
}

#[tokio::test(start_paused = true)]
async fn allows_up_to_the_limit_then_denies() {
    let limiter = limiter(5, 10);

    for i in 0..5u32 {
        let decision = limiter.check_limit("client-1").await;
        assert!(decision.allowed, "request {} should be allowed", i);
        assert_eq!(decision.remaining, 4 - i);
    }

    let decision = limiter.check_limit("client-1").await;
    assert!(!decision.allowed, "request over the limit should be denied");
    assert_eq!(decision.remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_attempts_do_not_consume_quota() {
    let limiter = limiter(1, 10);

    let first = limiter.check_limit("client-1").await;
    assert!(first.allowed);

    // Repeated denials keep the window end where it was
    for _ in 0..3 {
        let denied = limiter.check_limit("client-1").await;
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, first.reset_at);
    }

    let stats = limiter.stats().await;
    assert_eq!(stats.total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn window_rollover_resets_the_count() {
    let limiter = limiter(2, 10);

    limiter.check_limit("client-1").await;
    limiter.check_limit("client-1").await;
    assert!(!limiter.check_limit("client-1").await.allowed);

    tokio::time::advance(Duration::from_secs(11)).await;

    let decision = limiter.check_limit("client-1").await;
    assert!(decision.allowed, "fresh window should admit the request");
    // count restarted at 1, not carried over
    assert_eq!(decision.remaining, 1);
    assert_eq!(decision.reset_at, Instant::now() + Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn ip_and_user_namespaces_are_independent() {
    let shared = Arc::new(limiter(1, 60));
    let ip_limiter = IpRateLimiter::new(Arc::clone(&shared));
    let user_limiter = UserRateLimiter::new(Arc::clone(&shared));

    assert!(ip_limiter.check_ip_limit("1.2.3.4").await.allowed);
    assert!(!ip_limiter.check_ip_limit("1.2.3.4").await.allowed);

    // Same literal string through the user namespace has its own quota
    assert!(user_limiter.check_user_limit("1.2.3.4").await.allowed);
}

#[tokio::test(start_paused = true)]
async fn cleanup_drops_only_expired_windows() {
    let limiter = limiter(5, 10);

    limiter.check_limit("old").await;
    tokio::time::advance(Duration::from_secs(6)).await;
    limiter.check_limit("fresh").await;
    tokio::time::advance(Duration::from_secs(5)).await;

    // "old" ended at t=10, "fresh" runs until t=16
    assert_eq!(limiter.cleanup().await, 1);

    let stats = limiter.stats().await;
    assert_eq!(stats.total_keys, 1);
    assert_eq!(stats.total_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn stats_sum_counts_across_live_windows() {
    let limiter = limiter(10, 60);

    limiter.check_limit("a").await;
    limiter.check_limit("a").await;
    limiter.check_limit("b").await;

    let stats = limiter.stats().await;
    assert_eq!(stats.total_keys, 2);
    assert_eq!(stats.total_requests, 3);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_applies_to_subsequent_windows() {
    let limiter = limiter(1, 10);

    limiter.check_limit("a").await;
    limiter
        .configure(RateLimitConfig {
            max_requests: 3,
            window: Duration::from_secs(30),
        })
        .await;

    // The open window keeps its end but checks against the new ceiling
    let second = limiter.check_limit("a").await;
    assert!(second.allowed);
    assert_eq!(second.remaining, 1);

    // A new key opens a window with the new length
    let fresh = limiter.check_limit("b").await;
    assert_eq!(fresh.reset_at, Instant::now() + Duration::from_secs(30));
}
