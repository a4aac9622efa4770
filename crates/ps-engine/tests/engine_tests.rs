//! Failover Engine Integration Tests
//!
//! End-to-end scenarios across the generator, metrics registry, breaker
//! registry, load balancer and alert engine:
//! - Consecutive failures tripping a breaker mid-traffic
//! - Recovery timeout gating the OPEN to HALF_OPEN transition
//! - Round-robin selection order under explicit weights
//! - Forced outages rerouting traffic and raising alerts
//! - Downstream components observing post-update metrics within one step
//! - Stop cancelling all background activity

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;

use ps_common::{
    AlertSeverity, CircuitBreakerConfig, CircuitState, FailoverTrigger, LoadBalancingStrategy,
    ProviderStatus,
};
use ps_engine::{default_providers, CircuitBreakerRegistry, EngineConfig, FailoverEngine};

fn seeded_engine() -> FailoverEngine {
    FailoverEngine::with_seed(EngineConfig::default(), 99).unwrap()
}

#[tokio::test]
async fn test_five_consecutive_failures_trip_breaker_before_twentieth_transaction() {
    let breakers = CircuitBreakerRegistry::new(&default_providers(), CircuitBreakerConfig::default());

    // 60% overall success with a five-failure run starting at the sixth call
    let outcomes = [
        true, true, false, true, true, false, false, false, false, false, true, true, true, true,
        false, true, true, true, false, true,
    ];

    let mut opened_at = None;
    for (attempt, success) in outcomes.into_iter().enumerate() {
        if !breakers.can_execute("square") {
            opened_at = Some(attempt);
            break;
        }
        breakers.record_result("square", success);
    }

    let opened_at = opened_at.expect("breaker never opened");
    assert!(opened_at < 19, "breaker opened too late, at attempt {opened_at}");
    assert_eq!(breakers.state_of("square"), Some(CircuitState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_half_opens_only_after_recovery_timeout() {
    let engine = seeded_engine();
    assert!(engine.breakers().force_open("paypal"));
    assert!(!engine.breakers().can_execute("paypal"));

    tokio::time::advance(Duration::from_millis(59_000)).await;
    assert!(!engine.breakers().can_execute("paypal"));
    assert_eq!(engine.breakers().state_of("paypal"), Some(CircuitState::Open));

    tokio::time::advance(Duration::from_millis(2_000)).await;
    assert!(engine.breakers().can_execute("paypal"));
    assert_eq!(
        engine.breakers().state_of("paypal"),
        Some(CircuitState::HalfOpen)
    );
}

#[tokio::test]
async fn test_round_robin_cycles_regardless_of_weights() {
    let mut config = EngineConfig::default();
    config.balancer.strategy = LoadBalancingStrategy::RoundRobin;
    config.balancer.weights = HashMap::from([
        ("stripe".to_string(), 40),
        ("paypal".to_string(), 35),
        ("square".to_string(), 25),
    ]);
    let engine = FailoverEngine::with_seed(config, 99).unwrap();

    let all: Vec<String> = default_providers().iter().map(|p| p.id.clone()).collect();
    let picks: Vec<String> = (0..6)
        .map(|_| engine.balancer().select_provider(&all).unwrap())
        .collect();
    assert_eq!(
        picks,
        ["stripe", "paypal", "square", "stripe", "paypal", "square"]
    );
}

#[tokio::test]
async fn test_forced_outage_reroutes_traffic_and_raises_alerts() {
    let engine = seeded_engine();
    let mut txn_rx = engine.subscribe_transactions();

    assert!(engine.force_provider_down("stripe"));

    for _ in 0..30 {
        engine.step();
    }

    let mut rerouted = 0;
    while let Ok(txn) = txn_rx.try_recv() {
        assert_ne!(txn.provider_id, "stripe");
        rerouted += 1;
    }
    assert!(rerouted > 0);

    assert_eq!(engine.breakers().state_of("stripe"), Some(CircuitState::Open));
    assert!(!engine.breakers().can_execute("stripe"));

    let events = engine.balancer().failover_events();
    assert!(!events.is_empty());
    assert!(events.iter().any(|event| {
        event.from_provider_id.as_deref() == Some("stripe")
            && event.trigger == FailoverTrigger::CircuitBreaker
    }));

    let routes = engine.balancer().routes();
    let stripe = routes.iter().find(|r| r.provider_id == "stripe").unwrap();
    assert!(!stripe.available);

    let active = engine.alerts().active_alerts();
    assert!(active.iter().any(|alert| {
        alert.provider_id.as_deref() == Some("stripe")
            && alert.severity == AlertSeverity::Emergency
    }));
}

#[tokio::test]
async fn test_downstream_components_observe_post_update_metrics() {
    let engine = seeded_engine();
    engine.step();

    let snapshot = engine.metrics().snapshot();
    let routes = engine.balancer().routes();
    for provider in &snapshot {
        let route = routes
            .iter()
            .find(|r| r.provider_id == provider.id)
            .unwrap();
        assert_eq!(route.avg_response_time_ms, provider.avg_response_time_ms);
        assert_eq!(route.success_rate, provider.success_rate);
        assert_eq!(
            route.available,
            provider.status == ProviderStatus::Operational
        );
    }

    let recorded: usize = snapshot
        .iter()
        .map(|p| p.recent_transactions.len())
        .sum();
    assert_eq!(recorded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_all_background_activity() {
    let engine = Arc::new(seeded_engine());
    let mut txn_rx = engine.subscribe_transactions();

    assert!(engine.clone().start());
    for _ in 0..20 {
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    tokio::task::yield_now().await;

    let mut while_running = 0;
    while txn_rx.try_recv().is_ok() {
        while_running += 1;
    }
    assert!(while_running > 0, "expected transactions while running");

    assert!(engine.stop().await);

    for _ in 0..20 {
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    tokio::task::yield_now().await;
    assert!(matches!(txn_rx.try_recv(), Err(TryRecvError::Empty)));
}
