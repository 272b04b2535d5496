//! End-to-end behaviour with no backing store configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;

use fusion_coord::config::{CacheKindConfig, CircuitBreakerConfig, CircuitOverride, Settings};
use fusion_coord::{BreakerState, Coordinator, ManualClock};

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.circuit_breaker = CircuitBreakerConfig {
        overrides: HashMap::from([(
            "image-search".to_string(),
            CircuitOverride {
                failure_threshold: Some(2),
                reset_timeout_ms: Some(100),
                timeout_ms: Some(500),
            },
        )]),
        ..CircuitBreakerConfig::default()
    };
    settings.cache.kinds = HashMap::from([(
        "site".to_string(),
        CacheKindConfig {
            ttl_seconds: Some(1),
            sweep_interval_seconds: Some(60),
        },
    )]);
    settings
}

fn coordinator() -> (Arc<ManualClock>, Coordinator) {
    let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
    let coordinator = Coordinator::with_clock(settings(), clock.clone());
    (clock, coordinator)
}

#[tokio::test]
async fn breaker_walks_through_half_open() {
    let (clock, coordinator) = coordinator();
    let breakers = coordinator.breakers();

    breakers.record_failure("image-search", "503").await;
    assert!(!breakers.is_open("image-search").await.into_inner());
    breakers.record_failure("image-search", "503").await;
    assert!(breakers.is_open("image-search").await.into_inner());

    clock.advance(Duration::from_millis(150));
    let probe = breakers.is_open("image-search").await;
    assert!(probe.is_degraded());
    assert!(!probe.into_inner());
    assert!(breakers.is_open("image-search").await.into_inner());

    breakers.record_success("image-search").await;
    let status = breakers.status("image-search").await.into_inner();
    assert_eq!(status.state, BreakerState::Closed);
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.retry_in_ms, 0);
    assert_eq!(breakers.timeout("image-search"), Duration::from_millis(500));
}

#[tokio::test]
async fn cache_honours_ttl_and_invalidation() {
    let (clock, coordinator) = coordinator();
    let sites = coordinator.cache("site").await.unwrap();

    sites.set("site:acme", b"<html>acme</html>".to_vec()).await;
    sites.set("site:acme:blog", b"<html>blog</html>".to_vec()).await;

    clock.advance(Duration::from_millis(500));
    assert!(sites.get("site:acme").await.into_inner().is_some());

    let invalidated = sites.invalidate("site:acme").await;
    assert!(invalidated.is_degraded());
    assert!(sites.get("site:acme").await.into_inner().is_none());
    assert!(sites.get("site:acme:blog").await.into_inner().is_none());

    sites.set("site:beta", vec![1]).await;
    clock.advance(Duration::from_millis(1_500));
    assert!(sites.get("site:beta").await.into_inner().is_none());
}

#[tokio::test]
async fn health_report_covers_everything() {
    let (_, coordinator) = coordinator();
    coordinator.breakers().record_failure("mailer", "refused").await;
    coordinator.cache("page").await.unwrap().set("home", vec![1, 2, 3]).await;

    let report = coordinator.health().await;
    assert!(report.degraded);
    assert!(!report.backing_configured);

    let circuits: Vec<&str> = report.circuits.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(circuits, vec!["mailer"]);

    let kinds: Vec<&str> = report.caches.iter().map(|c| c.kind.as_str()).collect();
    assert_eq!(kinds, vec!["page", "site"]);

    coordinator.shutdown().await;
    assert!(coordinator.connections().is_closed());
}
