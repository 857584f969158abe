//! Error types for the Stripe client.

use raffle_core::RaffleError;
use thiserror::Error;

/// Errors from Stripe API calls and webhook verification.
#[derive(Error, Debug)]
pub enum StripeError {
    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response body did not decode
    #[error("Failed to parse response: {0}")]
    ResponseParseFailed(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Secret key rejected
    #[error("Unauthorized: invalid secret key")]
    Unauthorized,

    /// Stripe answered with an error object
    #[error("Stripe error {status}: {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Stripe error code (`card_declined`, `resource_missing`, ...)
        code: Option<String>,
        /// Error message
        message: String,
    },

    /// `Stripe-Signature` header missing parts or not matching the payload
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signed timestamp is outside the tolerance window
    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,

    /// Event body is not a well-formed event
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

impl From<reqwest::Error> for StripeError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed(err.to_string())
    }
}

impl From<StripeError> for RaffleError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::InvalidSignature(_)
            | StripeError::TimestampOutOfTolerance
            | StripeError::MalformedEvent(_) => Self::InvalidWebhook(err.to_string()),
            StripeError::RequestFailed(_)
            | StripeError::ResponseParseFailed(_)
            | StripeError::RateLimited
            | StripeError::Unauthorized
            | StripeError::ApiError { .. } => Self::ProviderError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_failures_map_to_invalid_webhook() {
        let err: RaffleError = StripeError::TimestampOutOfTolerance.into();
        assert_eq!(err.code(), "INVALID_WEBHOOK");
    }

    #[test]
    fn api_failures_map_to_provider_error() {
        let err: RaffleError = StripeError::ApiError {
            status: 402,
            code: Some("card_declined".to_string()),
            message: "Your card was declined.".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("card was declined"));
    }
}
