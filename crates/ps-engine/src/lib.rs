//! PaySentry Simulation Engine
//!
//! This crate provides the payment-gateway failover simulation core with:
//! - TransactionGenerator: Randomized transaction traffic shaped by provider profiles
//! - MetricsRegistry: Rolling per-provider metrics fed by every transaction
//! - CircuitBreakerRegistry: Per-provider CLOSED/OPEN/HALF_OPEN availability gates
//! - LoadBalancer: Strategy-driven provider selection and failover event tracking
//! - AlertEngine: Threshold rules over the metrics stream with an alert lifecycle
//! - FailoverEngine: Background tasks wiring all of the above together

pub mod alerts;
pub mod balancer;
pub mod breaker;
pub mod config;
pub mod engine;
pub mod generator;
pub mod metrics;

pub use alerts::AlertEngine;
pub use balancer::{LoadBalancer, LoadBalancerConfigUpdate};
pub use breaker::CircuitBreakerRegistry;
pub use config::{default_providers, EngineConfig, GeneratorConfig, ProviderProfile};
pub use engine::FailoverEngine;
pub use generator::TransactionGenerator;
pub use metrics::MetricsRegistry;
