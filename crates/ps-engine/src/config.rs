//! Engine configuration - provider catalog and component settings
//!
//! Everything here has sensible defaults so a development engine can be
//! built with `EngineConfig::default()`. The default catalog mirrors the
//! three gateway providers the simulation ships with.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ps_common::{
    AlertThresholds, CircuitBreakerConfig, LoadBalancerConfig, PaySentryError, ProviderStatus,
    Result,
};

/// Static description of one payment provider.
///
/// These are the configured baselines the generator samples from; live
/// numbers (status, rolling averages) belong to the metrics registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub id: String,
    pub name: String,
    /// Typical response time under normal conditions
    pub base_response_time_ms: f64,
    /// Configured success rate as a percentage
    pub success_rate: f64,
    pub fee_per_transaction: f64,
    pub initial_uptime: f64,
    pub initial_status: ProviderStatus,
    pub initial_transactions_today: u64,
}

impl ProviderProfile {
    pub fn new(id: &str, name: &str, base_response_time_ms: f64, success_rate: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            base_response_time_ms,
            success_rate,
            fee_per_transaction: 0.03,
            initial_uptime: 99.9,
            initial_status: ProviderStatus::Operational,
            initial_transactions_today: 0,
        }
    }

    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee_per_transaction = fee;
        self
    }

    pub fn with_initial_state(
        mut self,
        uptime: f64,
        status: ProviderStatus,
        transactions_today: u64,
    ) -> Self {
        self.initial_uptime = uptime;
        self.initial_status = status;
        self.initial_transactions_today = transactions_today;
        self
    }
}

/// Timing bounds for the transaction generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Minimum delay between transactions
    pub min_interval: Duration,
    /// Maximum delay between transactions
    pub max_interval: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub providers: Vec<ProviderProfile>,
    pub generator: GeneratorConfig,
    pub breaker: CircuitBreakerConfig,
    pub balancer: LoadBalancerConfig,
    pub alert_thresholds: AlertThresholds,
    /// Interval for the periodic metrics propagation tick
    pub tick_interval: Duration,
    /// Non-active alerts older than this are purged
    pub alert_retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            generator: GeneratorConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            balancer: LoadBalancerConfig::default(),
            alert_thresholds: AlertThresholds::default(),
            tick_interval: Duration::from_secs(5),
            alert_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Check internal consistency before the engine is built.
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(PaySentryError::Config(
                "at least one provider profile is required".to_string(),
            ));
        }
        if self.generator.min_interval > self.generator.max_interval {
            return Err(PaySentryError::Config(format!(
                "generator min_interval {:?} exceeds max_interval {:?}",
                self.generator.min_interval, self.generator.max_interval
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(PaySentryError::Config(
                "breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.half_open_success_threshold > self.breaker.half_open_max_calls {
            return Err(PaySentryError::Config(format!(
                "half_open_success_threshold {} exceeds half_open_max_calls {}",
                self.breaker.half_open_success_threshold, self.breaker.half_open_max_calls
            )));
        }
        for provider_id in self.balancer.weights.keys() {
            if !self.providers.iter().any(|p| &p.id == provider_id) {
                return Err(PaySentryError::UnknownProvider(provider_id.clone()));
            }
        }
        Ok(())
    }
}

/// The stock three-provider catalog.
pub fn default_providers() -> Vec<ProviderProfile> {
    vec![
        ProviderProfile::new("stripe", "Stripe", 120.0, 99.2)
            .with_fee(0.029)
            .with_initial_state(99.9, ProviderStatus::Operational, 1247),
        ProviderProfile::new("paypal", "PayPal", 340.0, 96.8)
            .with_fee(0.031)
            .with_initial_state(97.5, ProviderStatus::Degraded, 892),
        ProviderProfile::new("square", "Square", 180.0, 98.9)
            .with_fee(0.026)
            .with_initial_state(99.7, ProviderStatus::Operational, 634),
    ]
}
