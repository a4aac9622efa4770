//! Common API types and utilities

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Standard API error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error payload plus the HTTP status it is served with
pub type ErrorResponse = (StatusCode, Json<ApiError>);

pub type ApiResult<T> = std::result::Result<Json<T>, ErrorResponse>;

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> ErrorResponse {
        (
            StatusCode::NOT_FOUND,
            Json(Self {
                error: "NOT_FOUND".to_string(),
                message: message.into(),
                details: None,
            }),
        )
    }

    pub fn conflict(message: impl Into<String>) -> ErrorResponse {
        (
            StatusCode::CONFLICT,
            Json(Self {
                error: "CONFLICT".to_string(),
                message: message.into(),
                details: None,
            }),
        )
    }
}

/// Success response with optional message
#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}
