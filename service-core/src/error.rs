use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by the booking platform handlers.
///
/// Every variant renders as `{error, debug?}` JSON with an HTTP status, so
/// interactive callers always get a machine-readable reason plus optional
/// diagnostic detail.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A supplier or payment provider returned an error. Carries the
    /// provider's HTTP status, message, and debug payload verbatim.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        debug: Option<serde_json::Value>,
    },

    /// Negative eligibility outcome from the installment provider. Not a
    /// fault; the raw provider payload is returned for the caller to inspect.
    #[error("Not eligible")]
    NotEligible(serde_json::Value),

    /// The booking finish gate rejected the order: no paid payment row.
    #[error("Payment required before booking finish")]
    PaymentRequired {
        current_status: Option<String>,
        provider: Option<String>,
    },

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Persistence failure. Surfaced only when a read the caller depends on
    /// fails; writes around successful upstream calls are logged and
    /// swallowed at the call site instead.
    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            debug: Option<serde_json::Value>,
        }

        let (status, error_message, debug) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Upstream {
                status,
                message,
                debug,
            } => {
                // Pass the provider's status through when it is a valid
                // client/server code; anything else reads as a bad gateway.
                let code = StatusCode::from_u16(status)
                    .ok()
                    .filter(|c| c.is_client_error() || c.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                (code, message, debug)
            }
            AppError::NotEligible(raw) => (
                StatusCode::BAD_REQUEST,
                "not_eligible".to_string(),
                Some(raw),
            ),
            AppError::PaymentRequired {
                current_status,
                provider,
            } => (
                StatusCode::FORBIDDEN,
                "payment_required_before_booking_finish".to_string(),
                Some(serde_json::json!({
                    "payment_status": current_status,
                    "provider": provider,
                })),
            ),
            AppError::SignatureInvalid(msg) => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature".to_string(),
                Some(serde_json::Value::String(msg)),
            ),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error".to_string(),
                    None,
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error".to_string(),
                    None,
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                debug,
            }),
        )
            .into_response()
    }
}
