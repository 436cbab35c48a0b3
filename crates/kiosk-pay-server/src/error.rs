use actix_web::{HttpResponse, ResponseError};
use kiosk_pay::PayError;

/// Errors returned by the admin and onboarding routes.
///
/// Provider webhooks never use this type; they always answer in their
/// provider's own vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("admin routes are disabled")]
    AdminDisabled,

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PayError> for ApiError {
    fn from(e: PayError) -> Self {
        match e {
            PayError::NotFound(what) => ApiError::NotFound(what),
            PayError::Timeout(_) => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::AdminDisabled => HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden",
                "message": "Set ADMIN_TOKEN to enable admin routes"
            })),
            ApiError::Unauthorized => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required"
            })),
            ApiError::NotFound(what) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "not_found",
                "message": what
            })),
            ApiError::BadRequest(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "bad_request",
                "message": msg
            })),
            ApiError::Unavailable(msg) => {
                tracing::error!("Storage unavailable: {}", msg);
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "unavailable",
                    "message": "Storage is temporarily unavailable"
                }))
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
