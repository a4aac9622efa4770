//! Transaction Generator - synthetic payment attempts
//!
//! Produces one transaction at a time on a randomized schedule. Outcome and
//! latency are sampled from the provider's configured baseline, penalized by
//! the provider's current status. Generation itself cannot fail; a failed
//! payment is a modeled business outcome, not an error.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use uuid::Uuid;

use ps_common::{PaymentMethod, ProviderStatus, Transaction, TransactionStatus};

use crate::config::{GeneratorConfig, ProviderProfile};

const ERROR_CODES: &[&str] = &[
    "insufficient_funds",
    "card_declined",
    "network_error",
    "invalid_card",
    "processing_error",
    "timeout",
];

const CURRENCIES: &[&str] = &["USD", "EUR", "GBP"];

const PAYMENT_METHODS: &[PaymentMethod] =
    &[PaymentMethod::Card, PaymentMethod::Bank, PaymentMethod::Wallet];

/// Probability multiplier applied to the configured success rate.
fn success_penalty(status: ProviderStatus) -> f64 {
    match status {
        ProviderStatus::Operational => 1.0,
        ProviderStatus::Degraded => 0.9,
        ProviderStatus::Down => 0.7,
    }
}

/// Latency multiplier applied to the configured base response time.
fn latency_multiplier(status: ProviderStatus) -> f64 {
    match status {
        ProviderStatus::Operational => 1.0,
        ProviderStatus::Degraded => 1.5,
        ProviderStatus::Down => 2.5,
    }
}

pub struct TransactionGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl TransactionGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator for tests.
    pub fn with_seed(config: GeneratorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform delay until the next transaction.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.config.min_interval.as_millis() as u64;
        let max = self.config.max_interval.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Uniform pick over the provider catalog.
    pub fn pick_provider(&mut self, providers: &[ProviderProfile]) -> usize {
        self.rng.gen_range(0..providers.len())
    }

    /// Synthesize one payment attempt against the given provider.
    pub fn generate(&mut self, profile: &ProviderProfile, status: ProviderStatus) -> Transaction {
        let success_prob =
            (profile.success_rate / 100.0 * success_penalty(status)).clamp(0.0, 1.0);
        let succeeded = self.rng.gen_bool(success_prob);

        let jitter = self.rng.gen_range(0.8..1.2);
        let response_time_ms =
            (profile.base_response_time_ms * latency_multiplier(status) * jitter).round();

        let amount = (self.rng.gen_range(10.0_f64..510.0) * 100.0).round() / 100.0;
        let currency = CURRENCIES[self.rng.gen_range(0..CURRENCIES.len())];
        let payment_method = PAYMENT_METHODS[self.rng.gen_range(0..PAYMENT_METHODS.len())];

        let error_code = if succeeded {
            None
        } else {
            Some(ERROR_CODES[self.rng.gen_range(0..ERROR_CODES.len())].to_string())
        };

        Transaction {
            id: format!("txn_{}", Uuid::new_v4().simple()),
            provider_id: profile.id.clone(),
            amount,
            currency: currency.to_string(),
            status: if succeeded {
                TransactionStatus::Completed
            } else {
                TransactionStatus::Failed
            },
            timestamp: Utc::now(),
            response_time_ms,
            error_code,
            merchant_id: format!("merch_{}", &Uuid::new_v4().simple().to_string()[..8]),
            payment_method,
        }
    }
}
