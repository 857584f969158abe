//! External payment provider contract.
//!
//! The coordinator only needs a handful of capabilities: create, read, confirm and cancel
//! an intent, and turn a signed webhook delivery into a typed event. Provider secrets
//! (API key, webhook signing secret) belong to the implementation.

use crate::error::Result;
use crate::types::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request to open a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntentRequest {
    /// Amount in minor units
    pub amount: Money,
    /// ISO currency, lowercase
    pub currency: String,
    /// Human-readable description shown on the provider dashboard
    pub description: String,
    /// Key/value metadata attached to the intent
    pub metadata: Vec<(String, String)>,
    /// Provider-side idempotency key for this creation
    pub idempotency_key: String,
}

/// Provider-side state of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Waiting for the buyer to attach a payment method
    RequiresPaymentMethod,
    /// Waiting for confirmation
    RequiresConfirmation,
    /// Waiting for buyer action (3-D Secure and similar)
    RequiresAction,
    /// Charge in flight
    Processing,
    /// Funds captured
    Succeeded,
    /// Intent cancelled
    Canceled,
    /// A status this integration does not model
    #[serde(other)]
    Unknown,
}

/// An intent as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIntent {
    /// Provider intent identifier
    pub id: String,
    /// Secret handed to the client to complete payment
    pub client_secret: Option<String>,
    /// Current state
    pub status: IntentStatus,
    /// Amount in minor units
    pub amount: Money,
    /// ISO currency, lowercase
    pub currency: String,
    /// Attached payment method, if any
    pub payment_method: Option<String>,
    /// Last failure reported for the intent
    pub last_error: Option<String>,
}

/// Event kinds the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    /// Funds captured
    IntentSucceeded,
    /// A payment attempt failed
    IntentPaymentFailed,
    /// The intent was cancelled
    IntentCanceled,
    /// The charge is being processed
    IntentProcessing,
    /// Anything else; acknowledged and ignored
    Other(String),
}

impl WebhookEventKind {
    /// Map a provider event type onto a kind.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::IntentSucceeded,
            "payment_intent.payment_failed" => Self::IntentPaymentFailed,
            "payment_intent.canceled" => Self::IntentCanceled,
            "payment_intent.processing" => Self::IntentProcessing,
            other => Self::Other(other.to_string()),
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::IntentSucceeded => "intent.succeeded",
            Self::IntentPaymentFailed => "intent.payment_failed",
            Self::IntentCanceled => "intent.canceled",
            Self::IntentProcessing => "intent.processing",
            Self::Other(name) => name,
        }
    }
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Provider event identifier
    pub id: String,
    /// What happened
    pub kind: WebhookEventKind,
    /// Intent the event is about
    pub intent_id: String,
    /// Payment method reported with the event
    pub payment_method: Option<String>,
    /// Failure message reported with the event
    pub error_message: Option<String>,
}

/// Payment provider operations.
///
/// Transport and provider failures are reported as [`crate::RaffleError::ProviderError`];
/// signature and payload problems as [`crate::RaffleError::InvalidWebhook`].
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Open an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or cannot be reached.
    async fn create_intent(&self, request: CreateIntentRequest) -> Result<ProviderIntent>;

    /// Read an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or cannot be reached.
    async fn get_intent(&self, intent_id: &str) -> Result<ProviderIntent>;

    /// Confirm an intent server-side.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or cannot be reached.
    async fn confirm_intent(&self, intent_id: &str) -> Result<ProviderIntent>;

    /// Cancel an intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or cannot be reached.
    async fn cancel_intent(&self, intent_id: &str) -> Result<ProviderIntent>;

    /// Verify a webhook signature and parse the payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::InvalidWebhook`] if the signature does not match,
    /// is outside the tolerance window, or the payload is malformed.
    fn construct_webhook_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_map_to_kinds() {
        assert_eq!(
            WebhookEventKind::from_event_type("payment_intent.succeeded"),
            WebhookEventKind::IntentSucceeded
        );
        assert_eq!(
            WebhookEventKind::from_event_type("charge.refunded"),
            WebhookEventKind::Other("charge.refunded".to_string())
        );
        assert_eq!(WebhookEventKind::IntentCanceled.as_str(), "intent.canceled");
    }
}
