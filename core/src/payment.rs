//! Payment coordinator: idempotent intent creation and webhook processing.
//!
//! Creating an intent is the only client-driven side effect with money attached, so it
//! runs under an idempotency key: the first request records a `processing` row, later
//! requests with the same key and parameters replay the cached response, and requests
//! with the same key but different parameters are rejected.
//!
//! Webhooks move payments forward and, on success, confirm the reservation. The payment
//! is marked `succeeded` before the reservation is confirmed, so a crash between the two
//! leaves a paid payment that a redelivery (or the sweeper) finishes.

use crate::config::CoreConfig;
use crate::environment::{Clock, add_duration};
use crate::error::{RaffleError, Result};
use crate::provider::{
    CreateIntentRequest, IntentStatus, PaymentProvider, ProviderIntent, WebhookEvent,
    WebhookEventKind,
};
use crate::repository::{
    IdempotencyOutcome, IdempotencyRepository, PaymentRepository, RaffleRepository,
};
use crate::reservation::ReservationEngine;
use crate::retry::{RetryPolicy, retry_transient};
use crate::types::{
    IdempotencyRecord, IdempotencyStatus, Payment, PaymentId, PaymentMetadata, PaymentStatus,
    PaymentUpdate, Reservation, ReservationId, ReservationStatus, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Operation name recorded on idempotency rows for intent creation.
pub const CREATE_INTENT_OPERATION: &str = "POST /payments/intent";

/// Slack on top of the provider timeout before a `processing` key counts as abandoned.
const PROCESSING_GRACE: Duration = Duration::from_secs(30);

/// What the client needs to complete payment with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    /// Local payment id
    pub payment_id: PaymentId,
    /// Provider client secret
    pub client_secret: String,
    /// Amount in minor units
    pub amount: i64,
    /// ISO currency
    pub currency: String,
}

impl From<&Payment> for PaymentIntentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            client_secret: payment.client_secret.clone(),
            amount: payment.amount.cents(),
            currency: payment.currency.clone(),
        }
    }
}

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State moved forward
    Applied,
    /// Already processed; nothing changed
    Duplicate,
    /// Not ours or not interesting; acknowledged
    Ignored,
    /// Funds captured for a reservation that can no longer be confirmed
    RefundRequired,
}

impl WebhookOutcome {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::RefundRequired => "refund_required",
        }
    }
}

enum Begin {
    Started,
    Replay(PaymentIntentResponse),
}

/// Payment coordinator.
#[derive(Clone)]
pub struct PaymentCoordinator {
    engine: Arc<ReservationEngine>,
    raffles: Arc<dyn RaffleRepository>,
    payments: Arc<dyn PaymentRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    currency: String,
    idempotency_ttl: Duration,
    provider_timeout: Duration,
    read_retry: RetryPolicy,
}

impl PaymentCoordinator {
    /// Assemble a coordinator.
    #[must_use]
    pub fn new(
        engine: Arc<ReservationEngine>,
        raffles: Arc<dyn RaffleRepository>,
        payments: Arc<dyn PaymentRepository>,
        idempotency: Arc<dyn IdempotencyRepository>,
        provider: Arc<dyn PaymentProvider>,
        config: &CoreConfig,
    ) -> Self {
        let clock = Arc::clone(engine.clock());
        Self {
            engine,
            raffles,
            payments,
            idempotency,
            provider,
            clock,
            currency: config.currency.to_lowercase(),
            idempotency_ttl: config.idempotency_ttl,
            provider_timeout: config.provider_timeout,
            read_retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for provider reads.
    #[must_use]
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// The reservation engine this coordinator drives.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ReservationEngine> {
        &self.engine
    }

    // ═══════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════

    /// Load a payment on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::NotFound`] if it does not exist and
    /// [`RaffleError::Forbidden`] if it belongs to someone else.
    pub async fn get_owned(&self, id: PaymentId, user_id: UserId) -> Result<Payment> {
        let payment = self
            .payments
            .get_payment(id)
            .await?
            .ok_or_else(|| RaffleError::not_found("payment", id))?;
        if payment.user_id != user_id {
            return Err(RaffleError::Forbidden(format!(
                "payment {id} belongs to another user"
            )));
        }
        Ok(payment)
    }

    /// All payments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Payment>> {
        self.payments.list_payments_by_user(user_id).await
    }

    /// Client-driven confirmation: the reservation must be live and its payment succeeded.
    ///
    /// Confirming an already confirmed reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NotFound`] / [`RaffleError::Forbidden`] for the reservation
    /// - [`RaffleError::PaymentNotCompleted`] if no succeeded payment exists
    /// - [`RaffleError::AmountMismatch`] if the paid amount differs from the total
    /// - [`RaffleError::ReservationExpired`] if the window elapsed
    pub async fn confirm_paid_by_user(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<Reservation> {
        let reservation = self.engine.get_owned(reservation_id, user_id).await?;
        if reservation.status == ReservationStatus::Confirmed {
            return Ok(reservation);
        }

        let payment = self
            .payments
            .find_payment_by_reservation(reservation_id)
            .await?
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .ok_or(RaffleError::PaymentNotCompleted)?;
        if payment.amount != reservation.total_amount {
            return Err(RaffleError::AmountMismatch);
        }

        self.engine.confirm(reservation_id).await
    }

    /// Client-driven cancellation: release the numbers and close the open payment.
    ///
    /// A succeeded payment wins over the cancel. If the provider already reported success
    /// but the reservation was not confirmed yet, it is confirmed here and the cancel is
    /// refused.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NotFound`] / [`RaffleError::Forbidden`] for the reservation
    /// - [`RaffleError::AlreadyConfirmed`] once paid
    /// - [`RaffleError::ReservationExpired`] if it already expired
    #[tracing::instrument(skip(self), fields(reservation_id = %reservation_id, user_id = %user_id))]
    pub async fn cancel_by_user(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<Reservation> {
        self.engine.get_owned(reservation_id, user_id).await?;

        let paid = self
            .payments
            .find_payment_by_reservation(reservation_id)
            .await?
            .filter(|p| p.status == PaymentStatus::Succeeded);
        if let Some(payment) = paid {
            let outcome = self
                .apply_success(&payment, payment.payment_method.clone())
                .await?;
            if outcome != WebhookOutcome::RefundRequired {
                tracing::info!("Cancel refused: payment already succeeded");
                return Err(RaffleError::AlreadyConfirmed);
            }
        }

        let reservation = self.engine.cancel(reservation_id).await?;
        if let Err(e) = self
            .cancel_for_reservation(reservation_id, "reservation cancelled")
            .await
        {
            tracing::warn!(error = %e, "Failed to cancel payment for cancelled reservation");
        }
        Ok(reservation)
    }

    // ═══════════════════════════════════════════════════════════
    // Intent creation
    // ═══════════════════════════════════════════════════════════

    /// Open (or return the existing) payment intent for a reservation.
    ///
    /// With an idempotency key, a retried request replays the first response.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::IdempotencyInProgress`] / [`RaffleError::IdempotencyConflict`]
    /// - [`RaffleError::NotFound`] / [`RaffleError::Forbidden`] for the reservation
    /// - [`RaffleError::ReservationExpired`] / [`RaffleError::AlreadyConfirmed`] when it cannot be paid
    /// - [`RaffleError::AmountMismatch`] when an existing payment disagrees with the total
    /// - [`RaffleError::ProviderError`] when the provider fails or times out
    #[tracing::instrument(skip(self, idempotency_key), fields(reservation_id = %reservation_id, user_id = %user_id))]
    pub async fn create_intent(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
        idempotency_key: Option<&str>,
    ) -> Result<PaymentIntentResponse> {
        let Some(key) = idempotency_key.map(str::trim).filter(|k| !k.is_empty()) else {
            return self.create_intent_once(reservation_id, user_id).await;
        };

        let params = serde_json::json!({ "reservation_id": reservation_id }).to_string();
        match self.begin_idempotent(key, user_id, &params).await? {
            Begin::Replay(response) => {
                tracing::debug!("Replaying cached intent response");
                return Ok(response);
            }
            Begin::Started => {}
        }

        // Detached so the outcome is recorded even if the caller goes away mid-request.
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(
            async move { this.run_idempotent(&key, reservation_id, user_id).await }
                .in_current_span(),
        )
        .await
        .map_err(|e| RaffleError::Internal(format!("intent task failed: {e}")))?
    }

    async fn run_idempotent(
        &self,
        key: &str,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<PaymentIntentResponse> {
        let result = self.create_intent_once(reservation_id, user_id).await;
        let now = self.clock.now();
        let recorded = match &result {
            Ok(response) => {
                let body = serde_json::to_string(response)
                    .map_err(|e| RaffleError::Internal(e.to_string()))?;
                let outcome = IdempotencyOutcome {
                    status: IdempotencyStatus::Completed,
                    response_status: 201,
                    response_body: &body,
                };
                self.idempotency.finish(key, user_id, outcome, now).await
            }
            Err(err) => {
                let body = serde_json::json!({ "error": err.to_string(), "code": err.code() })
                    .to_string();
                let outcome = IdempotencyOutcome {
                    status: IdempotencyStatus::Failed,
                    response_status: err.status_code(),
                    response_body: &body,
                };
                self.idempotency.finish(key, user_id, outcome, now).await
            }
        };
        if let Err(e) = recorded {
            // The row stays `processing` until it goes stale and a retry reclaims it.
            tracing::error!(error = %e, "Failed to record idempotency outcome");
        }

        result
    }

    /// A `processing` row older than this was abandoned: no live request can still own it.
    fn is_abandoned(&self, record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
        record.status == IdempotencyStatus::Processing
            && add_duration(record.created_at, self.provider_timeout + PROCESSING_GRACE) <= now
    }

    async fn begin_idempotent(&self, key: &str, user_id: UserId, params: &str) -> Result<Begin> {
        let hash = hex::encode(Sha256::digest(params.as_bytes()));
        let now = self.clock.now();

        if let Some(existing) = self.idempotency.get_record(key, user_id).await? {
            let reclaim = existing.is_expired(now)
                || existing.status == IdempotencyStatus::Failed
                || self.is_abandoned(&existing, now);
            if reclaim {
                if existing.request_hash != hash && !existing.is_expired(now) {
                    return Err(RaffleError::IdempotencyConflict);
                }
                if existing.status == IdempotencyStatus::Processing {
                    tracing::warn!(
                        started_at = %existing.created_at,
                        "Reclaiming abandoned idempotency key"
                    );
                }
                self.idempotency.delete_record(key, user_id).await?;
            } else {
                return Self::resolve_existing(&existing, &hash);
            }
        }

        let record = IdempotencyRecord {
            key: key.to_string(),
            user_id,
            request_path: CREATE_INTENT_OPERATION.to_string(),
            request_params: params.to_string(),
            request_hash: hash.clone(),
            response_status: None,
            response_body: None,
            status: IdempotencyStatus::Processing,
            created_at: now,
            completed_at: None,
            expires_at: add_duration(now, self.idempotency_ttl),
        };
        if self.idempotency.try_begin(&record).await? {
            return Ok(Begin::Started);
        }

        // Lost the insert race to a concurrent request with the same key.
        match self.idempotency.get_record(key, user_id).await? {
            Some(existing) => Self::resolve_existing(&existing, &hash),
            None => Err(RaffleError::IdempotencyInProgress),
        }
    }

    fn resolve_existing(existing: &IdempotencyRecord, hash: &str) -> Result<Begin> {
        if existing.request_hash != hash {
            return Err(RaffleError::IdempotencyConflict);
        }
        match existing.status {
            IdempotencyStatus::Processing | IdempotencyStatus::Failed => {
                Err(RaffleError::IdempotencyInProgress)
            }
            IdempotencyStatus::Completed => {
                let body = existing.response_body.as_deref().ok_or_else(|| {
                    RaffleError::Internal("completed idempotency row has no body".to_string())
                })?;
                serde_json::from_str(body)
                    .map(Begin::Replay)
                    .map_err(|e| RaffleError::Internal(format!("corrupt cached response: {e}")))
            }
        }
    }

    async fn create_intent_once(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<PaymentIntentResponse> {
        let reservation = self.engine.get_owned(reservation_id, user_id).await?;
        ensure_payable(&reservation, self.clock.now())?;

        if let Some(existing) = self
            .payments
            .find_payment_by_reservation(reservation_id)
            .await?
        {
            if existing.amount != reservation.total_amount {
                tracing::warn!(
                    payment_id = %existing.id,
                    payment_amount = %existing.amount,
                    reservation_total = %reservation.total_amount,
                    "Existing payment amount disagrees with reservation"
                );
                return Err(RaffleError::AmountMismatch);
            }
            return Ok(PaymentIntentResponse::from(&existing));
        }

        let title = match self.raffles.get_raffle(reservation.raffle_id).await? {
            Some(raffle) => raffle.title,
            None => String::from("Raffle"),
        };
        let metadata = PaymentMetadata {
            reservation_id,
            raffle_id: reservation.raffle_id,
            user_id,
            number_count: reservation.number_ids.len(),
            number_ids: reservation
                .number_ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            raffle_title: title.clone(),
        };
        let request = CreateIntentRequest {
            amount: reservation.total_amount,
            currency: self.currency.clone(),
            description: format!("{} number(s) in {title}", reservation.number_ids.len()),
            metadata: metadata.to_pairs(),
            idempotency_key: format!("reservation-{reservation_id}-{}", reservation.total_amount.cents()),
        };

        let intent = self
            .call_provider(self.provider.create_intent(request))
            .await?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            RaffleError::ProviderError(format!("intent {} has no client secret", intent.id))
        })?;

        let now = self.clock.now();
        let payment = Payment {
            id: PaymentId::new(),
            reservation_id,
            user_id,
            raffle_id: reservation.raffle_id,
            provider_intent_id: intent.id.clone(),
            client_secret,
            amount: reservation.total_amount,
            currency: self.currency.clone(),
            status: PaymentStatus::Pending,
            payment_method: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };

        if !self.payments.insert_payment(&payment).await? {
            // A concurrent request won; both used the same provider idempotency key.
            let winner = self
                .payments
                .find_payment_by_reservation(reservation_id)
                .await?
                .ok_or_else(|| RaffleError::Internal("payment insert conflict".to_string()))?;
            return Ok(PaymentIntentResponse::from(&winner));
        }

        metrics::counter!("raffle_payment_intents_created_total").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            intent_id = %payment.provider_intent_id,
            amount = %payment.amount,
            provider = self.provider.name(),
            "Payment intent created"
        );

        Ok(PaymentIntentResponse::from(&payment))
    }

    async fn call_provider<F>(&self, call: F) -> Result<ProviderIntent>
    where
        F: std::future::Future<Output = Result<ProviderIntent>>,
    {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RaffleError::ProviderError(format!(
                "{} did not respond within {:?}",
                self.provider.name(),
                self.provider_timeout
            ))),
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Webhooks
    // ═══════════════════════════════════════════════════════════

    /// Verify a delivery with the provider and apply it.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::InvalidWebhook`] for bad signatures or payloads, and store
    /// errors so the provider redelivers.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome> {
        let event = self.provider.construct_webhook_event(payload, signature)?;
        self.process_webhook(&event).await
    }

    /// Apply a verified webhook event.
    ///
    /// Processing is idempotent: redelivering an event that was already applied is a no-op.
    ///
    /// # Errors
    ///
    /// Returns store errors so the provider redelivers.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, kind = event.kind.as_str(), intent_id = %event.intent_id))]
    pub async fn process_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let Some(payment) = self
            .payments
            .find_payment_by_intent(&event.intent_id)
            .await?
        else {
            tracing::info!("Webhook for unknown intent acknowledged");
            return Ok(WebhookOutcome::Ignored);
        };

        let outcome = match &event.kind {
            WebhookEventKind::IntentSucceeded => {
                self.apply_success(&payment, event.payment_method.clone())
                    .await?
            }
            WebhookEventKind::IntentPaymentFailed => self.apply_failure(&payment, event).await?,
            WebhookEventKind::IntentCanceled => self.apply_cancellation(&payment).await?,
            WebhookEventKind::IntentProcessing => {
                let update = PaymentUpdate::status(PaymentStatus::Processing, self.clock.now());
                if self
                    .payments
                    .update_payment(payment.id, &[PaymentStatus::Pending], &update)
                    .await?
                {
                    WebhookOutcome::Applied
                } else {
                    WebhookOutcome::Duplicate
                }
            }
            WebhookEventKind::Other(name) => {
                tracing::debug!(event_type = %name, "Ignoring unhandled webhook type");
                WebhookOutcome::Ignored
            }
        };

        metrics::counter!(
            "raffle_webhooks_processed_total",
            "event" => event.kind.as_str().to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        tracing::info!(outcome = outcome.as_str(), "Webhook processed");
        Ok(outcome)
    }

    async fn apply_success(
        &self,
        payment: &Payment,
        payment_method: Option<String>,
    ) -> Result<WebhookOutcome> {
        let now = self.clock.now();
        let mut outcome = WebhookOutcome::Duplicate;

        match payment.status {
            PaymentStatus::Succeeded => {}
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed => {
                // A failed attempt followed by a successful one is a new attempt in flight.
                if payment.status == PaymentStatus::Failed {
                    let retry = PaymentUpdate::status(PaymentStatus::Processing, now);
                    self.payments
                        .update_payment(payment.id, &[PaymentStatus::Failed], &retry)
                        .await?;
                }
                let update = PaymentUpdate::status(PaymentStatus::Succeeded, now)
                    .with_payment_method(payment_method)
                    .with_paid_at(now);
                if self
                    .payments
                    .update_payment(
                        payment.id,
                        &[PaymentStatus::Pending, PaymentStatus::Processing],
                        &update,
                    )
                    .await?
                {
                    outcome = WebhookOutcome::Applied;
                }
            }
            PaymentStatus::Cancelled | PaymentStatus::Refunded => {
                tracing::error!(
                    payment_id = %payment.id,
                    status = payment.status.as_str(),
                    "Success reported for a closed payment; refund required"
                );
                return Ok(WebhookOutcome::RefundRequired);
            }
        }

        // The payment is succeeded now; converge the reservation even on redelivery.
        match self.engine.confirm_paid(payment.reservation_id).await {
            Ok(reservation) => {
                if outcome == WebhookOutcome::Applied {
                    tracing::info!(reservation_id = %reservation.id, "Reservation paid and confirmed");
                }
                Ok(outcome)
            }
            Err(RaffleError::ReservationExpired | RaffleError::InvalidTransition(_)) => {
                tracing::error!(
                    payment_id = %payment.id,
                    reservation_id = %payment.reservation_id,
                    "Payment succeeded for a reservation that can no longer be confirmed; refund required"
                );
                let note = PaymentUpdate::status(PaymentStatus::Succeeded, now).with_error(Some(
                    "reservation no longer available; refund required".to_string(),
                ));
                self.payments
                    .update_payment(payment.id, &[PaymentStatus::Succeeded], &note)
                    .await?;
                Ok(WebhookOutcome::RefundRequired)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_failure(&self, payment: &Payment, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let update = PaymentUpdate::status(PaymentStatus::Failed, self.clock.now())
            .with_error(
                event
                    .error_message
                    .clone()
                    .or_else(|| Some("payment failed".to_string())),
            )
            .with_payment_method(event.payment_method.clone());
        let applied = self
            .payments
            .update_payment(
                payment.id,
                &[PaymentStatus::Pending, PaymentStatus::Processing],
                &update,
            )
            .await?;
        // The reservation stays pending so the buyer can retry inside the window.
        Ok(if applied {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::Duplicate
        })
    }

    async fn apply_cancellation(&self, payment: &Payment) -> Result<WebhookOutcome> {
        if payment.status == PaymentStatus::Succeeded {
            // Money was captured; finish the sale instead of releasing the numbers.
            self.apply_success(payment, payment.payment_method.clone())
                .await?;
            return Ok(WebhookOutcome::Duplicate);
        }

        let update = PaymentUpdate::status(PaymentStatus::Cancelled, self.clock.now());
        let applied = self
            .payments
            .update_payment(
                payment.id,
                &[
                    PaymentStatus::Pending,
                    PaymentStatus::Processing,
                    PaymentStatus::Failed,
                ],
                &update,
            )
            .await?;

        match self.engine.cancel(payment.reservation_id).await {
            Ok(_) | Err(RaffleError::ReservationExpired) => {}
            Err(RaffleError::AlreadyConfirmed) => {
                tracing::warn!(reservation_id = %payment.reservation_id, "Intent cancelled after confirmation");
            }
            Err(e) => return Err(e),
        }

        Ok(if applied {
            WebhookOutcome::Applied
        } else {
            WebhookOutcome::Duplicate
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Sweeper support
    // ═══════════════════════════════════════════════════════════

    /// Before an overdue reservation is expired, ask the provider whether it was paid.
    ///
    /// Returns `true` when the payment turned out to have succeeded and the reservation
    /// was confirmed instead.
    ///
    /// # Errors
    ///
    /// Returns store errors; provider failures are logged and treated as "not paid".
    pub async fn settle_overdue(&self, reservation_id: ReservationId) -> Result<bool> {
        let Some(payment) = self
            .payments
            .find_payment_by_reservation(reservation_id)
            .await?
        else {
            return Ok(false);
        };

        let status = if payment.status == PaymentStatus::Succeeded {
            IntentStatus::Succeeded
        } else if payment.status.is_open() || payment.status == PaymentStatus::Failed {
            match self.fetch_intent(&payment.provider_intent_id).await {
                Ok(intent) => intent.status,
                Err(e) => {
                    tracing::warn!(payment_id = %payment.id, error = %e, "Could not read intent before expiry");
                    return Ok(false);
                }
            }
        } else {
            return Ok(false);
        };

        if status != IntentStatus::Succeeded {
            return Ok(false);
        }

        let outcome = self.apply_success(&payment, payment.payment_method.clone()).await?;
        Ok(outcome != WebhookOutcome::RefundRequired)
    }

    async fn fetch_intent(&self, intent_id: &str) -> Result<ProviderIntent> {
        retry_transient(self.read_retry, || {
            self.call_provider(self.provider.get_intent(intent_id))
        })
        .await
    }

    /// Cancel the open payment of a reservation that was released; `reason` is recorded
    /// on the payment.
    ///
    /// Provider failures are logged; the local payment is cancelled regardless so it
    /// can no longer confirm anything.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn cancel_for_reservation(
        &self,
        reservation_id: ReservationId,
        reason: &str,
    ) -> Result<()> {
        let Some(payment) = self
            .payments
            .find_payment_by_reservation(reservation_id)
            .await?
        else {
            return Ok(());
        };
        if !(payment.status.is_open() || payment.status == PaymentStatus::Failed) {
            return Ok(());
        }

        if let Err(e) = self
            .call_provider(self.provider.cancel_intent(&payment.provider_intent_id))
            .await
        {
            tracing::warn!(payment_id = %payment.id, error = %e, "Provider cancel failed");
        }

        let update = PaymentUpdate::status(PaymentStatus::Cancelled, self.clock.now())
            .with_error(Some(reason.to_string()));
        self.payments
            .update_payment(
                payment.id,
                &[
                    PaymentStatus::Pending,
                    PaymentStatus::Processing,
                    PaymentStatus::Failed,
                ],
                &update,
            )
            .await?;
        Ok(())
    }
}

fn ensure_payable(reservation: &Reservation, now: DateTime<Utc>) -> Result<()> {
    match reservation.status {
        ReservationStatus::Pending if reservation.is_past_window(now) => {
            Err(RaffleError::ReservationExpired)
        }
        ReservationStatus::Pending => Ok(()),
        ReservationStatus::Confirmed => Err(RaffleError::AlreadyConfirmed),
        ReservationStatus::Expired => Err(RaffleError::ReservationExpired),
        ReservationStatus::Cancelled => Err(RaffleError::InvalidTransition(
            "reservation was cancelled".to_string(),
        )),
    }
}
