//! Stripe wire types.
//!
//! Only the fields the raffle flow reads are modelled; everything else in Stripe's
//! payloads is ignored on decode.

use raffle_core::provider::{IntentStatus, ProviderIntent, WebhookEvent, WebhookEventKind};
use raffle_core::types::Money;
use serde::Deserialize;

/// A `payment_intent` object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    /// `pi_...` identifier
    pub id: String,
    /// Amount in minor units
    #[serde(default)]
    pub amount: i64,
    /// Lowercase ISO currency
    #[serde(default)]
    pub currency: String,
    /// Stripe status string
    #[serde(default)]
    pub status: String,
    /// Secret for client-side confirmation
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Attached payment method id
    #[serde(default)]
    pub payment_method: Option<String>,
    /// Last failed attempt
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

/// `last_payment_error` sub-object.
#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    /// Decline or error code
    #[serde(default)]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl PaymentIntentObject {
    fn error_message(&self) -> Option<String> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
    }
}

/// Map a Stripe intent status onto the provider-neutral one.
#[must_use]
pub fn intent_status(status: &str) -> IntentStatus {
    match status {
        "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
        "requires_confirmation" => IntentStatus::RequiresConfirmation,
        "requires_action" => IntentStatus::RequiresAction,
        "processing" => IntentStatus::Processing,
        "succeeded" => IntentStatus::Succeeded,
        "canceled" => IntentStatus::Canceled,
        _ => IntentStatus::Unknown,
    }
}

impl From<PaymentIntentObject> for ProviderIntent {
    fn from(intent: PaymentIntentObject) -> Self {
        let last_error = intent.error_message();
        Self {
            status: intent_status(&intent.status),
            amount: Money::from_cents(intent.amount),
            currency: intent.currency.to_lowercase(),
            last_error,
            id: intent.id,
            client_secret: intent.client_secret,
            payment_method: intent.payment_method,
        }
    }
}

/// Stripe error envelope, `{"error": {...}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A webhook event whose `data.object` is a payment intent.
#[derive(Debug, Deserialize)]
pub struct EventObject {
    /// `evt_...` identifier
    pub id: String,
    /// Event type, e.g. `payment_intent.succeeded`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: EventData,
}

/// `data` member of an event.
#[derive(Debug, Deserialize)]
pub struct EventData {
    /// The object the event is about
    pub object: PaymentIntentObject,
}

impl From<EventObject> for WebhookEvent {
    fn from(event: EventObject) -> Self {
        let error_message = event.data.object.error_message();
        Self {
            id: event.id,
            kind: WebhookEventKind::from_event_type(&event.event_type),
            intent_id: event.data.object.id,
            payment_method: event.data.object.payment_method,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn decodes_intent_and_maps_status() {
        let json = r#"{
            "id": "pi_123",
            "object": "payment_intent",
            "amount": 3000,
            "currency": "USD",
            "status": "requires_payment_method",
            "client_secret": "pi_123_secret_abc",
            "payment_method": null,
            "last_payment_error": {"code": "card_declined", "message": null}
        }"#;
        let intent: ProviderIntent = serde_json::from_str::<PaymentIntentObject>(json).unwrap().into();

        assert_eq!(intent.status, IntentStatus::RequiresPaymentMethod);
        assert_eq!(intent.amount, Money::from_cents(3000));
        assert_eq!(intent.currency, "usd");
        assert_eq!(intent.last_error.as_deref(), Some("card_declined"));
    }

    #[test]
    fn unknown_status_is_preserved_as_unknown() {
        assert_eq!(intent_status("requires_capture"), IntentStatus::Unknown);
        assert_eq!(intent_status("succeeded"), IntentStatus::Succeeded);
    }
}
