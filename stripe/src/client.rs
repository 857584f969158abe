//! Stripe REST client for payment intents.

use crate::error::StripeError;
use crate::types::{ErrorEnvelope, PaymentIntentObject};
use crate::webhook::{DEFAULT_TOLERANCE, WebhookVerifier};
use async_trait::async_trait;
use raffle_core::error::Result;
use raffle_core::provider::{
    CreateIntentRequest, PaymentProvider, ProviderIntent, WebhookEvent,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

/// Public Stripe API base URL.
pub const DEFAULT_API_URL: &str = "https://api.stripe.com/v1";

/// Connection settings for [`StripeClient`].
#[derive(Clone)]
pub struct StripeConfig {
    /// `sk_...` secret key
    pub secret_key: String,
    /// `whsec_...` webhook endpoint secret
    pub webhook_secret: String,
    /// API base URL; overridden in tests
    pub api_url: String,
    /// Accepted clock skew for webhook timestamps
    pub webhook_tolerance: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_url", &self.api_url)
            .field("webhook_tolerance", &self.webhook_tolerance)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl StripeConfig {
    /// Settings for the public API with default tolerance and timeout.
    #[must_use]
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            api_url: DEFAULT_API_URL.to_string(),
            webhook_tolerance: DEFAULT_TOLERANCE,
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Point the client at another base URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// Stripe payment intents client.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_url: String,
    webhooks: WebhookVerifier,
}

impl StripeClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`StripeError::RequestFailed`] if the HTTP client cannot be built.
    pub fn new(config: StripeConfig) -> std::result::Result<Self, StripeError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            secret_key: config.secret_key,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            webhooks: WebhookVerifier::new(config.webhook_secret, config.webhook_tolerance),
        })
    }

    /// The webhook verifier bound to this endpoint's secret.
    #[must_use]
    pub const fn webhooks(&self) -> &WebhookVerifier {
        &self.webhooks
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.api_url))
            .bearer_auth(&self.secret_key)
    }

    /// Create a payment intent.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures.
    pub async fn create_payment_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> std::result::Result<PaymentIntentObject, StripeError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.cents().to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("description".to_string(), request.description.clone()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        form.extend(
            request
                .metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
        );

        let response = self
            .post("/payment_intents")
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;
        let intent = Self::handle(response).await?;
        tracing::debug!(intent_id = %intent.id, amount = intent.amount, "Stripe intent created");
        Ok(intent)
    }

    /// Retrieve a payment intent.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures.
    pub async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> std::result::Result<PaymentIntentObject, StripeError> {
        let response = self
            .client
            .get(format!("{}/payment_intents/{intent_id}", self.api_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::handle(response).await
    }

    /// Confirm a payment intent server-side.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures.
    pub async fn confirm_payment_intent(
        &self,
        intent_id: &str,
    ) -> std::result::Result<PaymentIntentObject, StripeError> {
        let response = self
            .post(&format!("/payment_intents/{intent_id}/confirm"))
            .send()
            .await?;
        Self::handle(response).await
    }

    /// Cancel a payment intent.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures.
    pub async fn cancel_payment_intent(
        &self,
        intent_id: &str,
    ) -> std::result::Result<PaymentIntentObject, StripeError> {
        let response = self
            .post(&format!("/payment_intents/{intent_id}/cancel"))
            .send()
            .await?;
        Self::handle(response).await
    }

    async fn handle(response: Response) -> std::result::Result<PaymentIntentObject, StripeError> {
        match response.status() {
            status if status.is_success() => response
                .json::<PaymentIntentObject>()
                .await
                .map_err(|e| StripeError::ResponseParseFailed(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(StripeError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(StripeError::Unauthorized),
            status => {
                let body = response.text().await.unwrap_or_default();
                let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
                    Ok(envelope) => (
                        envelope.error.code,
                        envelope.error.message.unwrap_or_else(|| body.clone()),
                    ),
                    Err(_) => (None, body),
                };
                tracing::warn!(status = status.as_u16(), code = ?code, "Stripe request rejected");
                Err(StripeError::ApiError {
                    status: status.as_u16(),
                    code,
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_intent(&self, request: CreateIntentRequest) -> Result<ProviderIntent> {
        Ok(self.create_payment_intent(&request).await?.into())
    }

    async fn get_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        Ok(self.retrieve_payment_intent(intent_id).await?.into())
    }

    async fn confirm_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        Ok(self.confirm_payment_intent(intent_id).await?.into())
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        Ok(self.cancel_payment_intent(intent_id).await?.into())
    }

    fn construct_webhook_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent> {
        let now = chrono::Utc::now().timestamp();
        Ok(self.webhooks.construct_event(payload, signature, now)?)
    }
}
