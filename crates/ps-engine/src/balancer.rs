//! Load Balancer / Router - provider selection and failover tracking
//!
//! Keeps one route per provider, synchronized from the metrics stream, and
//! picks among the currently permitted candidates using the configured
//! strategy. Reroutes away from a failing provider are logged as failover
//! events with a recovery estimate fed by the event history itself.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ps_common::{
    FailoverEvent, FailoverTrigger, LoadBalancerConfig, LoadBalancingStrategy, ProviderMetrics,
    ProviderRoute, ProviderStatus, RoutingSnapshot,
};

use crate::config::ProviderProfile;

/// Failover events kept before the oldest are dropped.
const EVENT_HISTORY_CAP: usize = 100;
/// Recovery estimate used when a provider has no failover history.
const DEFAULT_RECOVERY_ESTIMATE_MS: f64 = 300_000.0;
/// Weight given to providers missing from the weight table.
const FALLBACK_WEIGHT: u32 = 33;

/// Composite selection score for the health-based strategy.
pub fn composite_score(route: &ProviderRoute) -> f64 {
    let normalized_response_time = (100.0 - route.avg_response_time_ms / 10.0).max(0.0);
    route.health_score * 0.4 + normalized_response_time * 0.3 + route.success_rate * 0.3
}

/// Derive the 0-100 health score for a provider from its metrics.
pub fn health_score(provider: &ProviderMetrics) -> f64 {
    let mut score = 100.0;

    if provider.uptime < 99.0 {
        score -= (99.0 - provider.uptime) * 2.0;
    }
    if provider.avg_response_time_ms > 200.0 {
        score -= ((provider.avg_response_time_ms - 200.0) / 10.0).min(30.0);
    }
    if provider.success_rate < 99.0 {
        score -= (99.0 - provider.success_rate) * 3.0;
    }

    match provider.status {
        ProviderStatus::Down => score = 0.0,
        ProviderStatus::Degraded => score *= 0.7,
        ProviderStatus::Operational => {}
    }

    score.clamp(0.0, 100.0)
}

/// Partial configuration update; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct LoadBalancerConfigUpdate {
    pub strategy: Option<LoadBalancingStrategy>,
    pub weights: Option<HashMap<String, u32>>,
}

impl LoadBalancerConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_weights(mut self, weights: HashMap<String, u32>) -> Self {
        self.weights = Some(weights);
        self
    }
}

pub struct LoadBalancer {
    /// Routes in catalog order; order is what breaks selection ties
    routes: RwLock<Vec<ProviderRoute>>,
    config: RwLock<LoadBalancerConfig>,
    /// Shared cursor for round-robin, advanced on every selection
    round_robin_index: AtomicUsize,
    events: Mutex<VecDeque<FailoverEvent>>,
    rng: Mutex<StdRng>,
    tx: broadcast::Sender<RoutingSnapshot>,
}

impl LoadBalancer {
    pub fn new(profiles: &[ProviderProfile], config: LoadBalancerConfig) -> Self {
        Self::build(profiles, config, StdRng::from_entropy())
    }

    /// Deterministic weighted draws for tests.
    pub fn with_seed(profiles: &[ProviderProfile], config: LoadBalancerConfig, seed: u64) -> Self {
        Self::build(profiles, config, StdRng::seed_from_u64(seed))
    }

    fn build(profiles: &[ProviderProfile], config: LoadBalancerConfig, rng: StdRng) -> Self {
        let routes = profiles
            .iter()
            .map(|profile| ProviderRoute {
                provider_id: profile.id.clone(),
                weight: config
                    .weights
                    .get(&profile.id)
                    .copied()
                    .unwrap_or(FALLBACK_WEIGHT),
                health_score: 100.0,
                active_connections: 0,
                available: true,
                last_selected_at: None,
                avg_response_time_ms: 150.0,
                success_rate: 99.0,
            })
            .collect();
        let (tx, _) = broadcast::channel(64);
        Self {
            routes: RwLock::new(routes),
            config: RwLock::new(config),
            round_robin_index: AtomicUsize::new(0),
            events: Mutex::new(VecDeque::new()),
            rng: Mutex::new(rng),
            tx,
        }
    }

    /// Pick a provider among `available` candidates using the configured
    /// strategy. The winner's connection count and selection time are
    /// updated. Returns None when no candidate matches a known route.
    pub fn select_provider(&self, available: &[String]) -> Option<String> {
        let strategy = self.config.read().strategy;
        let selected = {
            let mut routes = self.routes.write();
            let candidates: Vec<usize> = routes
                .iter()
                .enumerate()
                .filter(|(_, route)| available.contains(&route.provider_id))
                .map(|(idx, _)| idx)
                .collect();
            if candidates.is_empty() {
                return None;
            }

            let winner = match strategy {
                LoadBalancingStrategy::RoundRobin => self.pick_round_robin(&candidates),
                LoadBalancingStrategy::Weighted => self.pick_weighted(&routes, &candidates),
                LoadBalancingStrategy::LeastConnections => {
                    pick_least_connections(&routes, &candidates)
                }
                LoadBalancingStrategy::HealthBased => pick_health_based(&routes, &candidates),
            };

            let route = &mut routes[winner];
            route.last_selected_at = Some(Utc::now());
            route.active_connections += 1;
            debug!(
                provider_id = %route.provider_id,
                strategy = ?strategy,
                connections = route.active_connections,
                "Provider selected"
            );
            route.provider_id.clone()
        };
        self.publish();
        Some(selected)
    }

    fn pick_round_robin(&self, candidates: &[usize]) -> usize {
        let cursor = self.round_robin_index.fetch_add(1, Ordering::SeqCst);
        candidates[cursor % candidates.len()]
    }

    fn pick_weighted(&self, routes: &[ProviderRoute], candidates: &[usize]) -> usize {
        let total: f64 = candidates.iter().map(|&idx| routes[idx].weight as f64).sum();
        if total <= 0.0 {
            return candidates[0];
        }
        let mut remaining = self.rng.lock().gen_range(0.0..total);
        for &idx in candidates {
            remaining -= routes[idx].weight as f64;
            if remaining <= 0.0 {
                return idx;
            }
        }
        candidates[0]
    }

    /// Routes whose provider is operational according to the last sync.
    pub fn available_providers(&self) -> Vec<String> {
        self.routes
            .read()
            .iter()
            .filter(|route| route.available)
            .map(|route| route.provider_id.clone())
            .collect()
    }

    /// Decrement a provider's connection count, never below zero.
    pub fn release_connection(&self, provider_id: &str) -> bool {
        let found = {
            let mut routes = self.routes.write();
            match routes.iter_mut().find(|r| r.provider_id == provider_id) {
                Some(route) => {
                    route.active_connections = route.active_connections.saturating_sub(1);
                    true
                }
                None => false,
            }
        };
        if found {
            self.publish();
        }
        found
    }

    /// Copy response time, success rate, availability and health score from
    /// the latest metrics. Never writes back to the metrics side.
    pub fn sync_from_metrics(&self, providers: &[ProviderMetrics]) {
        {
            let mut routes = self.routes.write();
            for provider in providers {
                if let Some(route) = routes.iter_mut().find(|r| r.provider_id == provider.id) {
                    route.avg_response_time_ms = provider.avg_response_time_ms;
                    route.success_rate = provider.success_rate;
                    route.available = provider.status == ProviderStatus::Operational;
                    route.health_score = health_score(provider);
                }
            }
        }
        self.publish();
    }

    /// Reroute away from a failing provider: select a replacement among the
    /// remaining available routes and append a failover event.
    pub fn trigger_failover(
        &self,
        from_provider_id: &str,
        trigger: FailoverTrigger,
        reason: &str,
    ) -> Option<FailoverEvent> {
        let available: Vec<String> = self
            .routes
            .read()
            .iter()
            .filter(|route| route.provider_id != from_provider_id && route.available)
            .map(|route| route.provider_id.clone())
            .collect();
        if available.is_empty() {
            warn!(
                from_provider = %from_provider_id,
                reason = %reason,
                "Failover requested but no available replacement routes"
            );
            return None;
        }

        let target = self.select_provider(&available)?;
        let estimate = self.estimate_recovery_ms(from_provider_id);
        let event = FailoverEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            trigger,
            from_provider_id: Some(from_provider_id.to_string()),
            to_provider_id: target,
            reason: reason.to_string(),
            recovery_estimate_ms: Some(estimate),
            successful: true,
        };
        {
            let mut events = self.events.lock();
            events.push_front(event.clone());
            events.truncate(EVENT_HISTORY_CAP);
        }
        warn!(
            from_provider = %from_provider_id,
            to_provider = %event.to_provider_id,
            trigger = ?trigger,
            reason = %reason,
            "Failover triggered"
        );
        self.publish();
        Some(event)
    }

    /// Mean of the provider's last 10 recorded estimates, or 5 minutes.
    fn estimate_recovery_ms(&self, provider_id: &str) -> f64 {
        let events = self.events.lock();
        let recent: Vec<f64> = events
            .iter()
            .filter(|event| event.from_provider_id.as_deref() == Some(provider_id))
            .take(10)
            .map(|event| {
                event
                    .recovery_estimate_ms
                    .unwrap_or(DEFAULT_RECOVERY_ESTIMATE_MS)
            })
            .collect();
        if recent.is_empty() {
            return DEFAULT_RECOVERY_ESTIMATE_MS;
        }
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    /// Apply a partial configuration update; new weights are merged into
    /// the live routes.
    pub fn update_config(&self, update: LoadBalancerConfigUpdate) {
        {
            let mut config = self.config.write();
            if let Some(strategy) = update.strategy {
                config.strategy = strategy;
                info!(strategy = ?strategy, "Load balancing strategy changed");
            }
            if let Some(weights) = update.weights {
                let mut routes = self.routes.write();
                for (provider_id, weight) in &weights {
                    if let Some(route) = routes.iter_mut().find(|r| &r.provider_id == provider_id)
                    {
                        route.weight = *weight;
                    }
                }
                config.weights.extend(weights);
            }
        }
        self.publish();
    }

    pub fn config(&self) -> LoadBalancerConfig {
        self.config.read().clone()
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.config.read().strategy
    }

    pub fn routes(&self) -> Vec<ProviderRoute> {
        self.routes.read().clone()
    }

    pub fn failover_events(&self) -> Vec<FailoverEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingSnapshot> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        let snapshot = RoutingSnapshot {
            routes: self.routes(),
            failover_events: self.failover_events(),
        };
        let _ = self.tx.send(snapshot);
    }
}

fn pick_least_connections(routes: &[ProviderRoute], candidates: &[usize]) -> usize {
    let mut best = candidates[0];
    for &idx in &candidates[1..] {
        if routes[idx].active_connections < routes[best].active_connections {
            best = idx;
        }
    }
    best
}

fn pick_health_based(routes: &[ProviderRoute], candidates: &[usize]) -> usize {
    let mut best = candidates[0];
    let mut best_score = composite_score(&routes[best]);
    for &idx in &candidates[1..] {
        let score = composite_score(&routes[idx]);
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}
