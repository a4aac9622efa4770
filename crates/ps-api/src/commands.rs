//! Command API
//!
//! REST endpoints mutating the simulation: lifecycle, forced outages,
//! breaker overrides, balancer reconfiguration and the alert lifecycle.
//! Commands addressing an unknown id answer 404 rather than erroring out.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    routing::{post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use ps_common::{
    AlertThresholds, CircuitBreakerConfig, FailoverEvent, LoadBalancerConfig,
    LoadBalancingStrategy,
};
use ps_engine::LoadBalancerConfigUpdate;

use crate::common::{ApiError, ApiResult, SuccessResponse};
use crate::ApiState;

/// Default actor stamped on acknowledgements without a body
const DEFAULT_ACKNOWLEDGER: &str = "System Admin";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfigRequest {
    pub strategy: Option<LoadBalancingStrategy>,
    pub weights: Option<HashMap<String, u32>>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverRequest {
    pub from_provider_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RuleUpdateRequest {
    pub enabled: bool,
}

// ============================================================================
// Simulation lifecycle
// ============================================================================

pub async fn start_simulation(State(state): State<ApiState>) -> Json<SuccessResponse> {
    if state.engine.clone().start() {
        Json(SuccessResponse::with_message("Simulation started"))
    } else {
        Json(SuccessResponse::rejected("Simulation already running"))
    }
}

pub async fn stop_simulation(State(state): State<ApiState>) -> Json<SuccessResponse> {
    if state.engine.stop().await {
        Json(SuccessResponse::with_message("Simulation stopped"))
    } else {
        Json(SuccessResponse::rejected("Simulation not running"))
    }
}

pub async fn force_provider_down(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.force_provider_down(&provider_id) {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {provider_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn force_provider_recovery(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.force_provider_recovery(&provider_id) {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {provider_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub fn simulation_router(state: ApiState) -> Router {
    Router::new()
        .route("/start", post(start_simulation))
        .route("/stop", post(stop_simulation))
        .route("/providers/:id/down", post(force_provider_down))
        .route("/providers/:id/recover", post(force_provider_recovery))
        .with_state(state)
}

// ============================================================================
// Circuit breaker overrides
// ============================================================================

pub async fn open_breaker(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.breakers().force_open(&provider_id) {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {provider_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn close_breaker(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.breakers().force_close(&provider_id) {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {provider_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn half_open_breaker(
    State(state): State<ApiState>,
    Path(provider_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.breakers().force_half_open(&provider_id) {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {provider_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn update_breaker_config(
    State(state): State<ApiState>,
    Json(config): Json<CircuitBreakerConfig>,
) -> Json<SuccessResponse> {
    info!(
        failure_threshold = config.failure_threshold,
        recovery_timeout_ms = config.recovery_timeout_ms,
        "Circuit breaker config update requested"
    );
    state.engine.breakers().update_config(config);
    Json(SuccessResponse::ok())
}

pub fn circuit_breakers_router(state: ApiState) -> Router {
    Router::new()
        .route("/config", put(update_breaker_config))
        .route("/:id/open", post(open_breaker))
        .route("/:id/close", post(close_breaker))
        .route("/:id/half-open", post(half_open_breaker))
        .with_state(state)
}

// ============================================================================
// Load balancer
// ============================================================================

pub async fn update_load_balancer_config(
    State(state): State<ApiState>,
    Json(request): Json<LoadBalancerConfigRequest>,
) -> Json<LoadBalancerConfig> {
    let mut update = LoadBalancerConfigUpdate::new();
    if let Some(strategy) = request.strategy {
        update = update.with_strategy(strategy);
    }
    if let Some(weights) = request.weights {
        update = update.with_weights(weights);
    }
    state.engine.balancer().update_config(update);
    Json(state.engine.balancer().config())
}

pub async fn trigger_failover(
    State(state): State<ApiState>,
    Json(request): Json<FailoverRequest>,
) -> ApiResult<FailoverEvent> {
    let known = state
        .engine
        .config()
        .providers
        .iter()
        .any(|p| p.id == request.from_provider_id);
    if !known {
        return Err(ApiError::not_found(format!(
            "Unknown provider: {}",
            request.from_provider_id
        )));
    }

    let reason = request.reason.as_deref().unwrap_or("Manual failover");
    match state
        .engine
        .trigger_manual_failover(&request.from_provider_id, reason)
    {
        Some(event) => Ok(Json(event)),
        None => Err(ApiError::conflict(format!(
            "No available replacement for provider {}",
            request.from_provider_id
        ))),
    }
}

pub fn load_balancer_router(state: ApiState) -> Router {
    Router::new()
        .route("/config", put(update_load_balancer_config))
        .route("/failover", post(trigger_failover))
        .with_state(state)
}

// ============================================================================
// Alerts
// ============================================================================

pub async fn acknowledge_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<SuccessResponse> {
    let acknowledged_by = body
        .and_then(|Json(request)| request.acknowledged_by)
        .unwrap_or_else(|| DEFAULT_ACKNOWLEDGER.to_string());
    if !state.engine.alerts().acknowledge(&alert_id, &acknowledged_by) {
        return Err(ApiError::not_found(format!(
            "No active alert with id {alert_id}"
        )));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    if !state.engine.alerts().resolve(&alert_id) {
        return Err(ApiError::not_found(format!("Unknown alert: {alert_id}")));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn update_alert_rule(
    State(state): State<ApiState>,
    Path(rule_id): Path<String>,
    Json(request): Json<RuleUpdateRequest>,
) -> ApiResult<SuccessResponse> {
    if !state
        .engine
        .alerts()
        .set_rule_enabled(&rule_id, request.enabled)
    {
        return Err(ApiError::not_found(format!("Unknown alert rule: {rule_id}")));
    }
    Ok(Json(SuccessResponse::ok()))
}

pub async fn update_alert_thresholds(
    State(state): State<ApiState>,
    Json(thresholds): Json<AlertThresholds>,
) -> Json<AlertThresholds> {
    state.engine.alerts().update_thresholds(thresholds);
    Json(state.engine.alerts().thresholds())
}

pub fn alerts_router(state: ApiState) -> Router {
    Router::new()
        .route("/thresholds", put(update_alert_thresholds))
        .route("/rules/:id", put(update_alert_rule))
        .route("/:id/acknowledge", post(acknowledge_alert))
        .route("/:id/resolve", post(resolve_alert))
        .with_state(state)
}
