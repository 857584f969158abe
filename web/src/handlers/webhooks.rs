//! `POST /webhooks/payments`
//!
//! The raw body is verified against the provider signature header before anything is
//! parsed. Success answers 200; a bad signature or payload answers 400 so the provider
//! stops retrying; any other failure answers 5xx so the provider redelivers and the
//! delivery goes through the idempotent path again.

use crate::error::AppError;
use crate::extractors::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true`
    pub received: bool,
    /// What the delivery did
    pub outcome: &'static str,
}

/// Handle one webhook delivery.
///
/// # Errors
///
/// 400 when the signature or payload is invalid, 503 when processing exceeds the
/// webhook deadline, other statuses per the underlying error.
pub async fn receive(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("missing signature header"))?;

    let outcome = tokio::time::timeout(
        state.webhook_timeout,
        state.payments.handle_webhook(&body, signature),
    )
    .await
    .map_err(|_| {
        tracing::warn!(%correlation_id, "Webhook processing timed out");
        AppError::unavailable("webhook processing timed out")
    })??;

    tracing::info!(%correlation_id, outcome = outcome.as_str(), "Webhook processed");
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}
