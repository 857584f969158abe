//! Error types for web handlers.
//!
//! [`AppError`] bridges [`RaffleError`] and HTTP: each domain error keeps its stable
//! machine code and conventional status, and the body is always
//! `{"code": ..., "message": ...}`.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use raffle_core::RaffleError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_ERROR")
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// Status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = Json(ErrorResponse {
            code: self.code,
            message: &self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<RaffleError> for AppError {
    fn from(err: RaffleError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = err.code();
        match err {
            // Store and internal failures are logged, never echoed.
            RaffleError::Database(_) | RaffleError::Internal(_) => {
                Self::new(status, "An internal error occurred", code)
                    .with_source(anyhow::Error::new(err))
            }
            other => {
                let message = other.to_string();
                let app = Self::new(status, message, code);
                if status.is_server_error() {
                    app.with_source(anyhow::Error::new(other))
                } else {
                    app
                }
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_core::types::NumberId;

    #[test]
    fn domain_errors_keep_code_and_status() {
        let err: AppError = RaffleError::NumbersUnavailable {
            numbers: vec![NumberId::new(3)],
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "NUMBERS_UNAVAILABLE");
        assert_eq!(err.to_string(), "[NUMBERS_UNAVAILABLE] Numbers unavailable: 3");
    }

    #[test]
    fn database_details_are_hidden() {
        let err: AppError = RaffleError::Database("relation does not exist".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("relation"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn store_outage_is_503() {
        let err: AppError = RaffleError::StoreUnavailable("redis down".to_string()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn display_includes_code() {
        let err = AppError::unauthorized("missing user");
        assert_eq!(err.to_string(), "[UNAUTHORIZED] missing user");
    }
}
