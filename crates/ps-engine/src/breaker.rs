//! Circuit Breaker Registry - per-provider availability gates
//!
//! One breaker per configured provider, CLOSED/OPEN/HALF_OPEN. Two
//! transition paths feed each breaker: counted transaction results within a
//! sliding window, and provider status observed from metrics. A hard `down`
//! status wins over the counting path; while it is latched the breaker
//! stays OPEN and refuses the timed half-open probe.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ps_common::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, ProviderMetrics};

use crate::config::ProviderProfile;

struct ProbeRecord {
    at: Instant,
    success: bool,
}

struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    /// Results backing the counters, pruned by age
    window: VecDeque<ProbeRecord>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    /// Latched while the provider's metrics status is `down`
    provider_down: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            window: VecDeque::new(),
            last_failure_at: None,
            last_success_at: None,
            next_attempt: None,
            next_attempt_at: None,
            provider_down: false,
        }
    }

    fn enter_open(&mut self, recovery_timeout: Duration) {
        self.state = CircuitState::Open;
        self.next_attempt = Some(Instant::now() + recovery_timeout);
        self.next_attempt_at =
            Some(Utc::now() + chrono::Duration::milliseconds(recovery_timeout.as_millis() as i64));
    }

    fn enter_half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.failure_count = 0;
        self.success_count = 0;
        self.window.clear();
        self.next_attempt = None;
        self.next_attempt_at = None;
    }

    fn enter_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.window.clear();
        self.next_attempt = None;
        self.next_attempt_at = None;
    }

    /// Age out records older than the window; each dropped record gives
    /// back one count on its side.
    fn prune_window(&mut self, window_size: Duration) {
        while let Some(front) = self.window.front() {
            if front.at.elapsed() <= window_size {
                break;
            }
            if front.success {
                self.success_count = self.success_count.saturating_sub(1);
            } else {
                self.failure_count = self.failure_count.saturating_sub(1);
            }
            self.window.pop_front();
        }
    }

    fn snapshot(&self, provider_id: &str) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            provider_id: provider_id.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            next_attempt_at: self.next_attempt_at,
        }
    }
}

/// Registry of circuit breakers, one per provider, with a shared config.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, BreakerEntry>,
    order: Vec<String>,
    config: RwLock<CircuitBreakerConfig>,
    tx: broadcast::Sender<Vec<CircuitBreakerSnapshot>>,
}

impl CircuitBreakerRegistry {
    pub fn new(profiles: &[ProviderProfile], config: CircuitBreakerConfig) -> Self {
        let breakers = DashMap::new();
        let mut order = Vec::with_capacity(profiles.len());
        for profile in profiles {
            breakers.insert(profile.id.clone(), BreakerEntry::new());
            order.push(profile.id.clone());
        }
        let (tx, _) = broadcast::channel(64);
        Self {
            breakers,
            order,
            config: RwLock::new(config),
            tx,
        }
    }

    /// Whether a request may be attempted against this provider right now.
    ///
    /// An OPEN breaker past its retry time lazily moves to HALF_OPEN here,
    /// unless the provider is hard down. Unknown providers are not gated.
    pub fn can_execute(&self, provider_id: &str) -> bool {
        let config = self.config.read().clone();
        let (allowed, transitioned) = {
            let Some(mut entry) = self.breakers.get_mut(provider_id) else {
                return true;
            };
            if entry.provider_down {
                (false, false)
            } else {
                match entry.state {
                    CircuitState::Closed => (true, false),
                    CircuitState::Open => {
                        if entry.next_attempt.map_or(false, |at| Instant::now() >= at) {
                            entry.enter_half_open();
                            info!(provider_id = %provider_id, "Circuit breaker half-open, probing");
                            (true, true)
                        } else {
                            (false, false)
                        }
                    }
                    CircuitState::HalfOpen => (
                        entry.success_count + entry.failure_count < config.half_open_max_calls,
                        false,
                    ),
                }
            }
        };
        if transitioned {
            self.publish();
        }
        allowed
    }

    /// Fold one transaction result into the provider's breaker.
    /// Returns the new state when the result caused a transition.
    pub fn record_result(&self, provider_id: &str, success: bool) -> Option<CircuitState> {
        let config = self.config.read().clone();
        let transition = {
            let Some(mut entry) = self.breakers.get_mut(provider_id) else {
                debug!(provider_id = %provider_id, "Result for unknown provider ignored");
                return None;
            };
            entry.prune_window(Duration::from_millis(config.window_size_ms));
            entry.window.push_back(ProbeRecord {
                at: Instant::now(),
                success,
            });

            if success {
                entry.success_count += 1;
                entry.last_success_at = Some(Utc::now());
                if entry.state == CircuitState::HalfOpen
                    && entry.success_count >= config.half_open_success_threshold
                {
                    entry.enter_closed();
                    info!(provider_id = %provider_id, "Circuit breaker closed after recovery");
                    Some(CircuitState::Closed)
                } else {
                    None
                }
            } else {
                entry.failure_count += 1;
                entry.last_failure_at = Some(Utc::now());
                match entry.state {
                    CircuitState::Closed if entry.failure_count >= config.failure_threshold => {
                        entry.enter_open(Duration::from_millis(config.recovery_timeout_ms));
                        warn!(
                            provider_id = %provider_id,
                            failures = entry.failure_count,
                            "Failure threshold reached, circuit breaker open"
                        );
                        Some(CircuitState::Open)
                    }
                    CircuitState::HalfOpen => {
                        entry.enter_open(Duration::from_millis(config.recovery_timeout_ms));
                        warn!(provider_id = %provider_id, "Probe failed, circuit breaker re-open");
                        Some(CircuitState::Open)
                    }
                    _ => None,
                }
            }
        };
        self.publish();
        transition
    }

    /// Apply provider status observed from metrics. `down` forces OPEN and
    /// latches; an operational provider whose breaker is OPEN past its
    /// retry time is moved to HALF_OPEN.
    pub fn update_from_metrics(&self, providers: &[ProviderMetrics]) {
        let config = self.config.read().clone();
        let mut changed = false;
        for provider in providers {
            let Some(mut entry) = self.breakers.get_mut(&provider.id) else {
                continue;
            };
            match provider.status {
                ps_common::ProviderStatus::Down => {
                    entry.provider_down = true;
                    if entry.state != CircuitState::Open {
                        entry.enter_open(Duration::from_millis(config.recovery_timeout_ms));
                        warn!(provider_id = %provider.id, "Provider down, forcing circuit breaker open");
                        changed = true;
                    }
                    entry.failure_count = config.failure_threshold;
                }
                ps_common::ProviderStatus::Operational => {
                    entry.provider_down = false;
                    if entry.state == CircuitState::Open
                        && entry.next_attempt.map_or(true, |at| Instant::now() >= at)
                    {
                        entry.enter_half_open();
                        info!(provider_id = %provider.id, "Provider recovered, circuit breaker half-open");
                        changed = true;
                    }
                }
                ps_common::ProviderStatus::Degraded => {}
            }
        }
        if changed {
            self.publish();
        }
    }

    pub fn force_open(&self, provider_id: &str) -> bool {
        let config = self.config.read().clone();
        {
            let Some(mut entry) = self.breakers.get_mut(provider_id) else {
                return false;
            };
            entry.enter_open(Duration::from_millis(config.recovery_timeout_ms));
            info!(provider_id = %provider_id, "Circuit breaker manually opened");
        }
        self.publish();
        true
    }

    pub fn force_close(&self, provider_id: &str) -> bool {
        {
            let Some(mut entry) = self.breakers.get_mut(provider_id) else {
                return false;
            };
            entry.enter_closed();
            info!(provider_id = %provider_id, "Circuit breaker manually closed");
        }
        self.publish();
        true
    }

    pub fn force_half_open(&self, provider_id: &str) -> bool {
        {
            let Some(mut entry) = self.breakers.get_mut(provider_id) else {
                return false;
            };
            entry.enter_half_open();
            info!(provider_id = %provider_id, "Circuit breaker manually half-opened");
        }
        self.publish();
        true
    }

    /// Providers whose breaker currently allows a request.
    pub fn permitted_providers(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.can_execute(id))
            .cloned()
            .collect()
    }

    pub fn state_of(&self, provider_id: &str) -> Option<CircuitState> {
        self.breakers.get(provider_id).map(|entry| entry.state)
    }

    pub fn snapshot(&self) -> Vec<CircuitBreakerSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.breakers.get(id).map(|entry| entry.snapshot(id)))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<CircuitBreakerSnapshot>> {
        self.tx.subscribe()
    }

    pub fn update_config(&self, config: CircuitBreakerConfig) {
        *self.config.write() = config;
        info!("Circuit breaker configuration updated");
    }

    fn publish(&self) {
        let _ = self.tx.send(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_providers;
    use ps_common::ProviderStatus;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(&default_providers(), CircuitBreakerConfig::default())
    }

    fn registry_with(config: CircuitBreakerConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(&default_providers(), config)
    }

    fn metrics_with_status(provider_id: &str, status: ProviderStatus) -> Vec<ProviderMetrics> {
        vec![ProviderMetrics {
            id: provider_id.to_string(),
            name: provider_id.to_string(),
            status,
            uptime: 99.9,
            avg_response_time_ms: 100.0,
            fee_per_transaction: 0.03,
            transactions_today: 0,
            success_rate: 99.0,
            recent_transactions: Vec::new(),
        }]
    }

    fn trip(registry: &CircuitBreakerRegistry, provider_id: &str) {
        for _ in 0..5 {
            registry.record_result(provider_id, false);
        }
        assert_eq!(registry.state_of(provider_id), Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_trips_open_after_threshold_failures() {
        let registry = registry();
        for _ in 0..4 {
            assert_eq!(registry.record_result("stripe", false), None);
        }
        assert_eq!(
            registry.record_result("stripe", false),
            Some(CircuitState::Open)
        );
        assert!(!registry.can_execute("stripe"));

        let snapshot = registry.snapshot();
        let stripe = snapshot.iter().find(|b| b.provider_id == "stripe").unwrap();
        assert_eq!(stripe.failure_count, 5);
        assert!(stripe.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_next_attempt_set_iff_open() {
        let registry = registry();
        let next_attempt = |id: &str| {
            registry
                .snapshot()
                .into_iter()
                .find(|b| b.provider_id == id)
                .unwrap()
                .next_attempt_at
        };

        assert!(next_attempt("stripe").is_none());
        trip(&registry, "stripe");
        assert!(next_attempt("stripe").is_some());
        assert!(registry.force_half_open("stripe"));
        assert!(next_attempt("stripe").is_none());
        assert!(registry.force_open("stripe"));
        assert!(next_attempt("stripe").is_some());
        assert!(registry.force_close("stripe"));
        assert!(next_attempt("stripe").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_half_opens_after_timeout() {
        let registry = registry();
        trip(&registry, "paypal");
        assert!(!registry.can_execute("paypal"));

        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert!(registry.can_execute("paypal"));
        assert_eq!(registry.state_of("paypal"), Some(CircuitState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let registry = registry();
        trip(&registry, "stripe");
        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert!(registry.can_execute("stripe"));

        assert_eq!(registry.record_result("stripe", true), None);
        assert_eq!(
            registry.record_result("stripe", true),
            Some(CircuitState::Closed)
        );
        assert!(registry.can_execute("stripe"));

        let snapshot = registry.snapshot();
        let stripe = snapshot.iter().find(|b| b.provider_id == "stripe").unwrap();
        assert_eq!(stripe.failure_count, 0);
        assert_eq!(stripe.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let registry = registry();
        trip(&registry, "stripe");
        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert!(registry.can_execute("stripe"));

        assert_eq!(
            registry.record_result("stripe", false),
            Some(CircuitState::Open)
        );
        assert!(!registry.can_execute("stripe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_budget_blocks_after_max_probes() {
        let registry = registry_with(CircuitBreakerConfig {
            half_open_max_calls: 1,
            half_open_success_threshold: 2,
            ..CircuitBreakerConfig::default()
        });
        trip(&registry, "stripe");
        tokio::time::advance(Duration::from_millis(61_000)).await;

        assert!(registry.can_execute("stripe"));
        registry.record_result("stripe", true);
        // Budget spent, success threshold not yet met
        assert_eq!(registry.state_of("stripe"), Some(CircuitState::HalfOpen));
        assert!(!registry.can_execute("stripe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_down_forces_open_and_suppresses_probe() {
        let registry = registry();
        registry.update_from_metrics(&metrics_with_status("square", ProviderStatus::Down));
        assert_eq!(registry.state_of("square"), Some(CircuitState::Open));

        let snapshot = registry.snapshot();
        let square = snapshot.iter().find(|b| b.provider_id == "square").unwrap();
        assert_eq!(square.failure_count, 5);

        // Past the retry time the latch still refuses probes
        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert!(!registry.can_execute("square"));
        assert_eq!(registry.state_of("square"), Some(CircuitState::Open));

        // Recovery past the timeout permits the half-open probe
        registry.update_from_metrics(&metrics_with_status("square", ProviderStatus::Operational));
        assert_eq!(registry.state_of("square"), Some(CircuitState::HalfOpen));
        assert!(registry.can_execute("square"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_down_recovery_before_timeout_stays_open() {
        let registry = registry();
        registry.update_from_metrics(&metrics_with_status("square", ProviderStatus::Down));
        assert_eq!(registry.state_of("square"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_millis(30_000)).await;
        registry.update_from_metrics(&metrics_with_status("square", ProviderStatus::Operational));
        assert_eq!(registry.state_of("square"), Some(CircuitState::Open));
        assert!(!registry.can_execute("square"));

        tokio::time::advance(Duration::from_millis(31_000)).await;
        registry.update_from_metrics(&metrics_with_status("square", ProviderStatus::Operational));
        assert_eq!(registry.state_of("square"), Some(CircuitState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_decay_releases_old_failures() {
        let registry = registry_with(CircuitBreakerConfig {
            window_size_ms: 1_000,
            ..CircuitBreakerConfig::default()
        });
        for _ in 0..3 {
            registry.record_result("stripe", false);
        }
        tokio::time::advance(Duration::from_millis(1_100)).await;

        // The three stale failures age out before the new one lands
        assert_eq!(registry.record_result("stripe", false), None);
        assert_eq!(registry.state_of("stripe"), Some(CircuitState::Closed));
        let snapshot = registry.snapshot();
        let stripe = snapshot.iter().find(|b| b.provider_id == "stripe").unwrap();
        assert_eq!(stripe.failure_count, 1);
    }

    #[tokio::test]
    async fn test_manual_overrides_and_unknown_ids() {
        let registry = registry();
        assert!(registry.force_open("stripe"));
        assert!(!registry.can_execute("stripe"));
        assert!(registry.force_half_open("stripe"));
        assert_eq!(registry.state_of("stripe"), Some(CircuitState::HalfOpen));
        assert!(registry.force_close("stripe"));
        assert!(registry.can_execute("stripe"));

        assert!(!registry.force_open("adyen"));
        assert!(!registry.force_close("adyen"));
        assert!(!registry.force_half_open("adyen"));
        assert_eq!(registry.record_result("adyen", true), None);
    }

    #[tokio::test]
    async fn test_permitted_providers_excludes_open() {
        let registry = registry();
        trip(&registry, "paypal");
        let permitted = registry.permitted_providers();
        assert_eq!(permitted, vec!["stripe".to_string(), "square".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_published_on_mutation() {
        let registry = registry();
        let mut rx = registry.subscribe();
        registry.force_open("paypal");
        let snapshot = rx.recv().await.unwrap();
        let paypal = snapshot.iter().find(|b| b.provider_id == "paypal").unwrap();
        assert_eq!(paypal.state, CircuitState::Open);
    }
}
