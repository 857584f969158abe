//! Payment endpoints.
//!
//! - `POST /payments/intent`: open (or replay) the intent for a reservation
//! - `GET /payments`: the caller's payments
//! - `GET /payments/:id`: one payment (owner only)

use crate::error::AppError;
use crate::extractors::{AuthUser, IdempotencyKey};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use raffle_core::payment::PaymentIntentResponse;
use raffle_core::types::{Payment, PaymentId, ReservationId};
use serde::Deserialize;

/// Request to open a payment intent.
#[derive(Debug, Deserialize)]
pub struct CreateIntentBody {
    /// Reservation to pay for
    pub reservation_id: ReservationId,
    /// Idempotency key; the `Idempotency-Key` header wins when both are sent
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `POST /payments/intent`
///
/// # Errors
///
/// 409 `IDEMPOTENCY_CONFLICT` / `IDEMPOTENCY_IN_PROGRESS` for key misuse, 400 once the
/// reservation expired, 502 when the provider fails.
pub async fn create_intent(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    IdempotencyKey(header_key): IdempotencyKey,
    body: Result<Json<CreateIntentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentIntentResponse>), AppError> {
    let Json(body) = body?;
    let key = header_key.or(body.idempotency_key);
    let response = state
        .payments
        .create_intent(body.reservation_id, user_id, key.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /payments`
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.payments.list_for_user(user_id).await?))
}

/// `GET /payments/:id`
///
/// # Errors
///
/// 404 when unknown, 403 when owned by someone else.
pub async fn get(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<PaymentId>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.payments.get_owned(id, user_id).await?))
}
