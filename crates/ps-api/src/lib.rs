//! PaySentry HTTP API
//!
//! Axum routers over a running [`FailoverEngine`]:
//!
//! - **monitoring**: read-only views of providers, breakers, routes,
//!   failover history and alerts
//! - **commands**: simulation lifecycle, forced outages, breaker and
//!   balancer overrides, alert acknowledgement
//!
//! Transport middleware (tracing, CORS) is layered on by the binary.

pub mod commands;
pub mod common;
pub mod monitoring;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use ps_engine::FailoverEngine;

pub use common::{ApiError, ApiResult, ErrorResponse, SuccessResponse};

/// Shared state handed to every router
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<FailoverEngine>,
}

impl ApiState {
    pub fn new(engine: Arc<FailoverEngine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assembles the full API surface under `/api`
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/monitoring", monitoring::monitoring_router(state.clone()))
        .nest("/api/simulation", commands::simulation_router(state.clone()))
        .nest(
            "/api/circuit-breakers",
            commands::circuit_breakers_router(state.clone()),
        )
        .nest(
            "/api/load-balancer",
            commands::load_balancer_router(state.clone()),
        )
        .nest("/api/alerts", commands::alerts_router(state))
}
