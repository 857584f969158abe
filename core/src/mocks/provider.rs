//! Scriptable payment provider.

use crate::error::{RaffleError, Result};
use crate::provider::{
    CreateIntentRequest, IntentStatus, PaymentProvider, ProviderIntent, WebhookEvent,
    WebhookEventKind,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Signature the mock accepts on webhook deliveries.
pub const VALID_SIGNATURE: &str = "mock-valid-signature";

#[derive(Debug, Default)]
struct State {
    intents: HashMap<String, ProviderIntent>,
    by_idempotency_key: HashMap<String, String>,
    create_calls: usize,
    cancel_calls: Vec<String>,
    fail_creates: usize,
    fail_gets: usize,
    create_delay: Option<Duration>,
    next_id: u64,
}

/// Mock payment provider.
///
/// Creations are idempotent per provider idempotency key, like real providers.
/// Failures and latency can be injected to exercise timeout and retry paths.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentProvider {
    state: Arc<Mutex<State>>,
}

/// Webhook payload format understood by [`MockPaymentProvider::construct_webhook_event`].
#[derive(Debug, Deserialize)]
struct MockEventPayload {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    intent_id: String,
    #[serde(default)]
    payment_method: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl MockPaymentProvider {
    /// Create a provider with no intents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` `create_intent` calls with a provider error.
    pub fn fail_next_creates(&self, n: usize) {
        self.state().fail_creates = n;
    }

    /// Fail the next `n` `get_intent` calls with a provider error.
    pub fn fail_next_gets(&self, n: usize) {
        self.state().fail_gets = n;
    }

    /// Delay every `create_intent` call.
    pub fn delay_creates(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    /// Force an intent into a status, as if the buyer acted on it.
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        if let Some(intent) = self.state().intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Number of `create_intent` calls that reached the provider.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Number of distinct intents created.
    #[must_use]
    pub fn intent_count(&self) -> usize {
        self.state().intents.len()
    }

    /// Intents cancelled through `cancel_intent`, in call order.
    #[must_use]
    pub fn cancelled_intents(&self) -> Vec<String> {
        self.state().cancel_calls.clone()
    }

    /// Delivery body for `event_type` on `intent_id`; pair it with [`VALID_SIGNATURE`].
    #[must_use]
    pub fn webhook_payload(event_type: &str, intent_id: &str) -> Vec<u8> {
        serde_json::json!({
            "id": format!("evt_{intent_id}_{event_type}"),
            "type": event_type,
            "intent_id": intent_id,
            "payment_method": "pm_mock_card",
        })
        .to_string()
        .into_bytes()
    }

    /// A verified event, bypassing payload encoding.
    #[must_use]
    pub fn event(kind: WebhookEventKind, intent_id: &str) -> WebhookEvent {
        WebhookEvent {
            id: format!("evt_{intent_id}_{}", kind.as_str()),
            kind,
            intent_id: intent_id.to_string(),
            payment_method: Some("pm_mock_card".to_string()),
            error_message: None,
        }
    }

    fn intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        self.state()
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| RaffleError::ProviderError(format!("no such intent: {intent_id}")))
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_intent(&self, request: CreateIntentRequest) -> Result<ProviderIntent> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.create_calls += 1;
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(RaffleError::ProviderError(
                "injected provider failure".to_string(),
            ));
        }

        if let Some(existing) = state
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let id = format!("pi_mock_{}", state.next_id);
        let intent = ProviderIntent {
            id: id.clone(),
            client_secret: Some(format!("{id}_secret")),
            status: IntentStatus::RequiresPaymentMethod,
            amount: request.amount,
            currency: request.currency,
            payment_method: None,
            last_error: None,
        };
        state.intents.insert(id.clone(), intent.clone());
        state.by_idempotency_key.insert(request.idempotency_key, id);
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        {
            let mut state = self.state();
            if state.fail_gets > 0 {
                state.fail_gets -= 1;
                return Err(RaffleError::ProviderError(
                    "injected provider failure".to_string(),
                ));
            }
        }
        self.intent(intent_id)
    }

    async fn confirm_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        let mut state = self.state();
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| RaffleError::ProviderError(format!("no such intent: {intent_id}")))?;
        intent.status = IntentStatus::Succeeded;
        intent.payment_method = Some("pm_mock_card".to_string());
        Ok(intent.clone())
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        let mut state = self.state();
        state.cancel_calls.push(intent_id.to_string());
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| RaffleError::ProviderError(format!("no such intent: {intent_id}")))?;
        if intent.status == IntentStatus::Succeeded {
            return Err(RaffleError::ProviderError(
                "cannot cancel a succeeded intent".to_string(),
            ));
        }
        intent.status = IntentStatus::Canceled;
        Ok(intent.clone())
    }

    fn construct_webhook_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        if signature != VALID_SIGNATURE {
            return Err(RaffleError::InvalidWebhook(
                "signature verification failed".to_string(),
            ));
        }
        let parsed: MockEventPayload = serde_json::from_slice(payload)
            .map_err(|e| RaffleError::InvalidWebhook(format!("malformed payload: {e}")))?;
        Ok(WebhookEvent {
            id: parsed.id,
            kind: WebhookEventKind::from_event_type(&parsed.event_type),
            intent_id: parsed.intent_id,
            payment_method: parsed.payment_method,
            error_message: parsed.error_message,
        })
    }
}
