use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

// ============================================================================
// Transaction Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Bank,
    Wallet,
}

/// One simulated payment attempt. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub provider_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub merchant_id: String,
    pub payment_method: PaymentMethod,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

// ============================================================================
// Provider Metrics Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Operational,
    Degraded,
    Down,
}

/// Rolling statistics for one provider, maintained by the metrics registry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub id: String,
    pub name: String,
    pub status: ProviderStatus,
    /// Uptime percentage, adjusted by forced outage/recovery commands
    pub uptime: f64,
    /// Exponentially weighted moving average over observed response times
    pub avg_response_time_ms: f64,
    pub fee_per_transaction: f64,
    pub transactions_today: u64,
    /// Percentage of successful transactions over the recent window
    pub success_rate: f64,
    /// Most recent transactions, oldest first, bounded
    pub recent_transactions: Vec<Transaction>,
}

// ============================================================================
// Circuit Breaker Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Failures within the window that trip CLOSED -> OPEN
    pub failure_threshold: u32,
    /// How long an OPEN breaker waits before probing
    pub recovery_timeout_ms: u64,
    /// Probe budget while HALF_OPEN
    pub half_open_max_calls: u32,
    /// Successes required to close from HALF_OPEN
    pub half_open_success_threshold: u32,
    /// Age beyond which recorded results no longer count
    pub window_size_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 3,
            half_open_success_threshold: 2,
            window_size_ms: 300_000,
        }
    }
}

/// Point-in-time view of one breaker, published after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    /// Set if and only if the breaker is OPEN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Load Balancing Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    Weighted,
    LeastConnections,
    HealthBased,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategy,
    /// provider id -> routing weight
    pub weights: HashMap<String, u32>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("stripe".to_string(), 40);
        weights.insert("paypal".to_string(), 35);
        weights.insert("square".to_string(), 25);
        Self {
            strategy: LoadBalancingStrategy::HealthBased,
            weights,
        }
    }
}

/// Per-provider routing descriptor owned by the load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRoute {
    pub provider_id: String,
    pub weight: u32,
    /// Composite 0-100 health score derived from metrics
    pub health_score: f64,
    pub active_connections: u32,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_selected_at: Option<DateTime<Utc>>,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverTrigger {
    Manual,
    CircuitBreaker,
    HealthCheck,
    ThresholdBreach,
}

/// Record of traffic being rerouted away from a failing provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: FailoverTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_provider_id: Option<String>,
    pub to_provider_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_estimate_ms: Option<f64>,
    pub successful: bool,
}

/// Routes and failover history published together on every balancer change.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSnapshot {
    pub routes: Vec<ProviderRoute>,
    pub failover_events: Vec<FailoverEvent>,
}

// ============================================================================
// Alert Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Uptime,
    ResponseTime,
    SuccessRate,
    ProviderDown,
}

/// Severity levels, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    LessThan,
    GreaterThan,
    Equals,
}

/// Threshold rule evaluated against every provider's metrics.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    pub alert_type: AlertType,
    /// None applies the rule to all providers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    pub severity: AlertSeverity,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub enabled: bool,
    pub title: String,
    /// Supports {providerName}, {value} and {threshold} placeholders
    pub message_template: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBand {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    /// Breached below the band values
    pub uptime: ThresholdBand,
    /// Breached above the band values
    pub response_time: ThresholdBand,
    /// Only the critical value backs a default rule
    pub success_rate: ThresholdBand,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            uptime: ThresholdBand {
                warning: 98.0,
                critical: 95.0,
            },
            response_time: ThresholdBand {
                warning: 300.0,
                critical: 500.0,
            },
            success_rate: ThresholdBand {
                warning: 98.0,
                critical: 95.0,
            },
        }
    }
}

/// A raised alert and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    /// Observed metric value at creation time
    pub value: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        rule: &AlertRule,
        provider_id: String,
        provider_name: String,
        value: f64,
    ) -> Self {
        let message = rule
            .message_template
            .replace("{providerName}", &provider_name)
            .replace("{value}", &format_metric(value))
            .replace("{threshold}", &format_metric(rule.threshold));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type: rule.alert_type,
            severity: rule.severity,
            status: AlertStatus::Active,
            title: rule.title.clone(),
            message,
            provider_id: Some(provider_id),
            provider_name: Some(provider_name),
            value,
            threshold: rule.threshold,
            created_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.created_at).num_minutes()
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Renders whole numbers without a trailing ".0" so alert messages read
/// "98%" rather than "98.0%", matching how thresholds are configured.
fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.1}", value)
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PaySentryError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PaySentryError>;
