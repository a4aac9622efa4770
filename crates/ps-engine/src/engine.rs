//! Failover engine - wires the generator, metrics, breakers, balancer and
//! alerts together and drives them from two background tasks.
//!
//! The generator task emits one simulated transaction per randomized delay.
//! Each transaction is recorded into the metrics registry first; the breaker
//! registry, load balancer and alert engine then all observe the same
//! post-update snapshot. A second task re-propagates metrics on a fixed tick
//! so status-driven transitions (breaker recovery, alert resolution, route
//! availability) keep moving even between transactions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ps_common::{FailoverEvent, FailoverTrigger, ProviderStatus, Result, Transaction};

use crate::alerts::AlertEngine;
use crate::balancer::LoadBalancer;
use crate::breaker::CircuitBreakerRegistry;
use crate::config::EngineConfig;
use crate::generator::TransactionGenerator;
use crate::metrics::MetricsRegistry;

pub struct FailoverEngine {
    config: EngineConfig,
    metrics: MetricsRegistry,
    breakers: CircuitBreakerRegistry,
    balancer: LoadBalancer,
    alerts: AlertEngine,
    generator: Mutex<TransactionGenerator>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transaction_tx: broadcast::Sender<Transaction>,
}

impl FailoverEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Deterministic generator and balancer draws for tests.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Result<Self> {
        Self::build(config, Some(seed))
    }

    fn build(config: EngineConfig, seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        let metrics = MetricsRegistry::new(&config.providers);
        let breakers = CircuitBreakerRegistry::new(&config.providers, config.breaker.clone());
        let balancer = match seed {
            Some(seed) => LoadBalancer::with_seed(&config.providers, config.balancer.clone(), seed),
            None => LoadBalancer::new(&config.providers, config.balancer.clone()),
        };
        let generator = match seed {
            Some(seed) => TransactionGenerator::with_seed(config.generator.clone(), seed),
            None => TransactionGenerator::new(config.generator.clone()),
        };
        let alerts = AlertEngine::new(config.alert_thresholds.clone());
        let (shutdown_tx, _) = broadcast::channel(1);
        let (transaction_tx, _) = broadcast::channel(64);
        Ok(Self {
            config,
            metrics,
            breakers,
            balancer,
            alerts,
            generator: Mutex::new(generator),
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            transaction_tx,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the generator and tick tasks. Returns false when the engine is
    /// already running.
    pub fn start(self: Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(
            providers = self.config.providers.len(),
            strategy = ?self.balancer.strategy(),
            "Failover engine starting"
        );

        let engine = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let generator_handle = tokio::spawn(async move {
            loop {
                let delay = engine.generator.lock().next_delay();
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Transaction generator stopping");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        engine.step();
                    }
                }
            }
        });

        let engine = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tick_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.tick_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Metrics tick loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        engine.tick();
                    }
                }
            }
        });

        self.tasks.lock().extend([generator_handle, tick_handle]);
        true
    }

    /// Signal both tasks to stop and wait for them to finish. Returns false
    /// when the engine was not running.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        future::join_all(handles).await;
        info!("Failover engine stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Simulation pipeline
    // ========================================================================

    /// Advance the simulation by a single transaction attempt.
    ///
    /// The generator picks an intended provider; if its breaker denies the
    /// call the balancer reroutes to a replacement and records a failover
    /// event, and if no replacement exists the attempt is dropped. The
    /// resulting transaction updates the metrics registry before any other
    /// component observes the new snapshot.
    pub fn step(&self) {
        let intended = {
            let mut generator = self.generator.lock();
            let idx = generator.pick_provider(&self.config.providers);
            self.config.providers[idx].clone()
        };

        let mut held_route = None;
        let executing = if self.breakers.can_execute(&intended.id) {
            intended
        } else {
            let reason = format!(
                "Circuit breaker blocked transaction for provider {}",
                intended.name
            );
            let Some(event) = self.balancer.trigger_failover(
                &intended.id,
                FailoverTrigger::CircuitBreaker,
                &reason,
            ) else {
                debug!(
                    provider_id = %intended.id,
                    "Transaction attempt dropped, no reroute target available"
                );
                return;
            };
            held_route = Some(event.to_provider_id.clone());
            match self
                .config
                .providers
                .iter()
                .find(|profile| profile.id == event.to_provider_id)
            {
                Some(profile) => profile.clone(),
                None => {
                    debug!(
                        provider_id = %event.to_provider_id,
                        "Reroute target missing from the provider catalog"
                    );
                    self.balancer.release_connection(&event.to_provider_id);
                    return;
                }
            }
        };

        let status = self
            .metrics
            .status_of(&executing.id)
            .unwrap_or(ProviderStatus::Operational);
        let txn = self.generator.lock().generate(&executing, status);

        self.metrics.record(&txn);
        let snapshot = self.metrics.snapshot();

        self.breakers.record_result(&txn.provider_id, txn.is_success());
        self.breakers.update_from_metrics(&snapshot);
        self.balancer.sync_from_metrics(&snapshot);
        self.alerts.evaluate(&snapshot);

        if let Some(provider_id) = held_route {
            self.balancer.release_connection(&provider_id);
        }

        let _ = self.transaction_tx.send(txn);
    }

    fn tick(&self) {
        self.propagate();
        self.alerts.clear_old(self.config.alert_retention);
    }

    /// Push the current metrics snapshot through the breaker registry,
    /// balancer and alert engine.
    fn propagate(&self) {
        let snapshot = self.metrics.snapshot();
        self.breakers.update_from_metrics(&snapshot);
        self.balancer.sync_from_metrics(&snapshot);
        self.alerts.evaluate(&snapshot);
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Hard-fail a provider and immediately propagate the new status.
    pub fn force_provider_down(&self, provider_id: &str) -> bool {
        if !self.metrics.force_down(provider_id) {
            return false;
        }
        self.propagate();
        true
    }

    /// Begin recovery for a hard-failed provider and propagate.
    pub fn force_provider_recovery(&self, provider_id: &str) -> bool {
        if !self.metrics.force_recovery(provider_id) {
            return false;
        }
        self.propagate();
        true
    }

    /// Reroute traffic away from a provider on operator request. No
    /// connection is held since there is no transaction behind the drill.
    pub fn trigger_manual_failover(&self, from_provider_id: &str, reason: &str) -> Option<FailoverEvent> {
        let event =
            self.balancer
                .trigger_failover(from_provider_id, FailoverTrigger::Manual, reason)?;
        self.balancer.release_connection(&event.to_provider_id);
        Some(event)
    }

    // ========================================================================
    // Component access
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn subscribe_transactions(&self) -> broadcast::Receiver<Transaction> {
        self.transaction_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_common::{AlertSeverity, CircuitState};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn engine() -> FailoverEngine {
        FailoverEngine::with_seed(EngineConfig::default(), 7).unwrap()
    }

    #[tokio::test]
    async fn test_step_records_and_broadcasts() {
        let engine = engine();
        let mut txn_rx = engine.subscribe_transactions();
        let mut metrics_rx = engine.metrics().subscribe();

        engine.step();

        let txn = txn_rx.try_recv().unwrap();
        let snapshot = metrics_rx.try_recv().unwrap();
        let provider = snapshot.iter().find(|p| p.id == txn.provider_id).unwrap();
        assert_eq!(provider.recent_transactions.last().unwrap().id, txn.id);
    }

    #[tokio::test]
    async fn test_step_reroutes_around_open_breaker() {
        // Failure-free traffic so no healthy breaker trips mid-test
        let mut config = EngineConfig::default();
        for profile in &mut config.providers {
            profile.success_rate = 100.0;
            profile.initial_status = ProviderStatus::Operational;
        }
        let engine = FailoverEngine::with_seed(config, 7).unwrap();
        let mut txn_rx = engine.subscribe_transactions();
        assert!(engine.breakers().force_open("stripe"));

        for _ in 0..50 {
            engine.step();
        }

        let mut received = 0;
        loop {
            match txn_rx.try_recv() {
                Ok(txn) => {
                    assert_ne!(txn.provider_id, "stripe");
                    received += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(other) => panic!("unexpected recv error: {other}"),
            }
        }
        assert!(received > 0);

        let events = engine.balancer().failover_events();
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .any(|event| event.from_provider_id.as_deref() == Some("stripe")));
        // Held connections were released once each transaction completed
        assert!(engine
            .balancer()
            .routes()
            .iter()
            .all(|route| route.active_connections == 0));
    }

    #[tokio::test]
    async fn test_force_down_propagates_everywhere() {
        let engine = engine();
        assert!(engine.force_provider_down("square"));

        assert_eq!(
            engine.metrics().status_of("square"),
            Some(ProviderStatus::Down)
        );
        assert_eq!(engine.breakers().state_of("square"), Some(CircuitState::Open));
        assert!(!engine.breakers().can_execute("square"));

        let routes = engine.balancer().routes();
        let square = routes.iter().find(|r| r.provider_id == "square").unwrap();
        assert!(!square.available);
        assert_eq!(square.health_score, 0.0);

        let active = engine.alerts().active_alerts();
        assert!(active
            .iter()
            .any(|alert| alert.severity == AlertSeverity::Emergency
                && alert.provider_id.as_deref() == Some("square")));

        assert!(!engine.force_provider_down("adyen"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reopens_breaker_only_after_timeout() {
        let engine = engine();
        engine.force_provider_down("square");
        assert!(engine.force_provider_recovery("square"));

        // Status recovers right away, the breaker stays open until the
        // recovery timeout has also elapsed
        assert_eq!(
            engine.metrics().status_of("square"),
            Some(ProviderStatus::Operational)
        );
        assert_eq!(engine.breakers().state_of("square"), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_millis(61_000)).await;
        assert!(engine.breakers().can_execute("square"));
        assert_eq!(
            engine.breakers().state_of("square"),
            Some(CircuitState::HalfOpen)
        );
    }

    #[tokio::test]
    async fn test_manual_failover_releases_connection() {
        let engine = engine();
        let event = engine
            .trigger_manual_failover("stripe", "Operator drill")
            .unwrap();
        assert_eq!(event.trigger, FailoverTrigger::Manual);
        assert_eq!(event.from_provider_id.as_deref(), Some("stripe"));

        let routes = engine.balancer().routes();
        assert!(routes.iter().all(|route| route.active_connections == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let engine = Arc::new(engine());
        let mut txn_rx = engine.subscribe_transactions();

        assert!(engine.clone().start());
        assert!(!engine.clone().start());
        assert!(engine.is_running());

        for _ in 0..30 {
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        tokio::task::yield_now().await;

        let mut received = 0;
        while txn_rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received > 0, "expected transactions while running");

        assert!(engine.stop().await);
        assert!(!engine.stop().await);
        assert!(!engine.is_running());

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        tokio::task::yield_now().await;
        assert!(matches!(txn_rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
