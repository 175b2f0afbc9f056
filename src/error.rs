use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors reported to gateway callers. Variants carry the full user-facing
/// message; the operation-specific code is attached when rendering.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotInitialized(String),

    #[error("{0}")]
    NotConnected(String),

    #[error("{0}")]
    PurchaseInFlight(String),

    #[error("{0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    QueryFailed(String),

    #[error("{0}")]
    PurchaseBeginFailed(String),

    #[error("{0}")]
    PurchaseCancelled(String),

    #[error("{0}")]
    PurchaseFailed(String),

    #[error("{0}")]
    ConsumeFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ApiError::NotInitialized(_) => "NOT_INITIALIZED",
            ApiError::NotConnected(_) => "NOT_CONNECTED",
            ApiError::PurchaseInFlight(_) => "PURCHASE_IN_FLIGHT",
            ApiError::ConnectionFailed(_) => "CONNECTION_FAILED",
            ApiError::QueryFailed(_) => "QUERY_FAILED",
            ApiError::PurchaseBeginFailed(_) => "PURCHASE_BEGIN_FAILED",
            ApiError::PurchaseCancelled(_) => "PURCHASE_CANCELLED",
            ApiError::PurchaseFailed(_) => "PURCHASE_FAILED",
            ApiError::ConsumeFailed(_) => "CONSUME_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotInitialized(_)
            | ApiError::NotConnected(_)
            | ApiError::PurchaseInFlight(_) => StatusCode::CONFLICT,
            ApiError::PurchaseCancelled(_) | ApiError::PurchaseFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::ConnectionFailed(_)
            | ApiError::QueryFailed(_)
            | ApiError::PurchaseBeginFailed(_)
            | ApiError::ConsumeFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_operations() {
        assert_eq!(
            ApiError::ConnectionFailed("Connection failed: refused".into()).code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(
            ApiError::PurchaseCancelled("Purchase cancelled by user".into()).code(),
            "PURCHASE_CANCELLED"
        );
        assert_eq!(
            ApiError::ConsumeFailed("Consume failed: bad token".into()).code(),
            "CONSUME_FAILED"
        );
    }

    #[test]
    fn test_message_passes_through_unchanged() {
        let err = ApiError::InvalidArgument("SKUs list is required".into());
        assert_eq!(err.to_string(), "SKUs list is required");
    }
}
