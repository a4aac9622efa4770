//! Monitoring API
//!
//! Read-only REST endpoints over the simulation registries.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use ps_common::{
    Alert, AlertRule, AlertSeverity, AlertStatus, AlertThresholds, CircuitBreakerSnapshot,
    CircuitState, FailoverEvent, LoadBalancingStrategy, ProviderMetrics, ProviderRoute,
    ProviderStatus,
};

use crate::ApiState;

/// Provider metrics with status tallies
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderMetrics>,
    pub operational: usize,
    pub degraded: usize,
    pub down: usize,
}

/// Circuit breaker snapshots with per-state tallies
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakersResponse {
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub total_open: usize,
    pub total_half_open: usize,
    pub total_closed: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutesResponse {
    pub strategy: LoadBalancingStrategy,
    pub routes: Vec<ProviderRoute>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEventsResponse {
    pub events: Vec<FailoverEvent>,
    pub total: usize,
}

/// Query params for the alerts endpoint
#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct AlertsQuery {
    /// Filter by lifecycle status: active, acknowledged, resolved
    pub status: Option<AlertStatus>,
    /// Filter by provider id
    pub provider: Option<String>,
    /// Filter by severity: info, warning, critical, emergency
    pub severity: Option<AlertSeverity>,
    /// Truncate the (newest-first) result list
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub total_active: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertRulesResponse {
    pub rules: Vec<AlertRule>,
    pub thresholds: AlertThresholds,
}

/// Engine-wide status summary
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatusResponse {
    pub running: bool,
    pub strategy: LoadBalancingStrategy,
    pub providers: usize,
    pub open_breakers: usize,
    pub active_alerts: usize,
    pub failover_events: usize,
}

pub async fn get_providers(State(state): State<ApiState>) -> Json<ProvidersResponse> {
    let providers = state.engine.metrics().snapshot();
    let count = |status: ProviderStatus| providers.iter().filter(|p| p.status == status).count();
    Json(ProvidersResponse {
        operational: count(ProviderStatus::Operational),
        degraded: count(ProviderStatus::Degraded),
        down: count(ProviderStatus::Down),
        providers,
    })
}

pub async fn get_circuit_breakers(State(state): State<ApiState>) -> Json<CircuitBreakersResponse> {
    let breakers = state.engine.breakers().snapshot();
    let count = |target: CircuitState| breakers.iter().filter(|b| b.state == target).count();
    Json(CircuitBreakersResponse {
        total_open: count(CircuitState::Open),
        total_half_open: count(CircuitState::HalfOpen),
        total_closed: count(CircuitState::Closed),
        breakers,
    })
}

pub async fn get_routes(State(state): State<ApiState>) -> Json<RoutesResponse> {
    Json(RoutesResponse {
        strategy: state.engine.balancer().strategy(),
        routes: state.engine.balancer().routes(),
    })
}

pub async fn get_failover_events(State(state): State<ApiState>) -> Json<FailoverEventsResponse> {
    let events = state.engine.balancer().failover_events();
    Json(FailoverEventsResponse {
        total: events.len(),
        events,
    })
}

pub async fn get_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let all = state.engine.alerts().alerts(None);
    let total_active = all.iter().filter(|alert| alert.is_active()).count();
    let alerts: Vec<Alert> = all
        .into_iter()
        .filter(|alert| query.status.map_or(true, |status| alert.status == status))
        .filter(|alert| {
            query
                .provider
                .as_deref()
                .map_or(true, |id| alert.provider_id.as_deref() == Some(id))
        })
        .filter(|alert| {
            query
                .severity
                .map_or(true, |severity| alert.severity == severity)
        })
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();
    Json(AlertsResponse {
        alerts,
        total_active,
    })
}

pub async fn get_alert_rules(State(state): State<ApiState>) -> Json<AlertRulesResponse> {
    Json(AlertRulesResponse {
        rules: state.engine.alerts().rules(),
        thresholds: state.engine.alerts().thresholds(),
    })
}

pub async fn get_status(State(state): State<ApiState>) -> Json<SimulationStatusResponse> {
    let engine = &state.engine;
    let open_breakers = engine
        .breakers()
        .snapshot()
        .iter()
        .filter(|b| b.state == CircuitState::Open)
        .count();
    Json(SimulationStatusResponse {
        running: engine.is_running(),
        strategy: engine.balancer().strategy(),
        providers: engine.metrics().snapshot().len(),
        open_breakers,
        active_alerts: engine.alerts().active_alerts().len(),
        failover_events: engine.balancer().failover_events().len(),
    })
}

pub fn monitoring_router(state: ApiState) -> Router {
    Router::new()
        .route("/providers", get(get_providers))
        .route("/circuit-breakers", get(get_circuit_breakers))
        .route("/routes", get(get_routes))
        .route("/failover-events", get(get_failover_events))
        .route("/alerts", get(get_alerts))
        .route("/alert-rules", get(get_alert_rules))
        .route("/status", get(get_status))
        .with_state(state)
}
