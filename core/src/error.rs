//! Error types for reservation and payment operations.

use crate::types::NumberId;
use thiserror::Error;

/// Result type alias for raffle core operations.
pub type Result<T> = std::result::Result<T, RaffleError>;

/// Error taxonomy shared by the reservation engine, payment coordinator, and their stores.
///
/// Each variant carries a stable machine-readable code (see [`RaffleError::code`]) so
/// the HTTP surface and the idempotency ledger can report failures without string matching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RaffleError {
    // ═══════════════════════════════════════════════════════════
    // Request validation
    // ═══════════════════════════════════════════════════════════

    /// A reservation request named no numbers.
    #[error("No numbers selected")]
    NoNumbersSelected,

    /// The request was malformed (duplicate numbers, empty session id, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Computed amount is zero or negative.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    // ═══════════════════════════════════════════════════════════
    // Lookup and ownership
    // ═══════════════════════════════════════════════════════════

    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("raffle", "reservation", "payment")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The caller does not own the referenced reservation or payment.
    #[error("Access denied: {0}")]
    Forbidden(String),

    // ═══════════════════════════════════════════════════════════
    // Reservation lifecycle
    // ═══════════════════════════════════════════════════════════

    /// The raffle is not accepting reservations.
    #[error("Raffle is not active")]
    RaffleNotActive,

    /// One or more requested numbers are held, owned, or missing.
    #[error("Numbers unavailable: {}", format_numbers(.numbers))]
    NumbersUnavailable {
        /// Numbers that could not be reserved
        numbers: Vec<NumberId>,
    },

    /// The number is already part of this reservation.
    #[error("Number {0} is already in this reservation")]
    NumberAlreadyInReservation(NumberId),

    /// The number is held by another reservation or already sold.
    #[error("Number {0} is already reserved")]
    NumberAlreadyReserved(NumberId),

    /// The reservation window has elapsed.
    #[error("Reservation has expired")]
    ReservationExpired,

    /// The reservation is already confirmed and cannot be cancelled.
    #[error("Reservation is already confirmed")]
    AlreadyConfirmed,

    /// The requested status change is not allowed from the current state.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    // ═══════════════════════════════════════════════════════════
    // Payments and idempotency
    // ═══════════════════════════════════════════════════════════

    /// The stored payment amount no longer matches the reservation total.
    #[error("Payment amount does not match reservation total")]
    AmountMismatch,

    /// The reservation has no completed payment.
    #[error("Payment has not completed")]
    PaymentNotCompleted,

    /// An earlier request with the same idempotency key is still running.
    #[error("Request with this idempotency key is still in progress")]
    IdempotencyInProgress,

    /// The idempotency key was reused with different request parameters.
    #[error("Idempotency key reused with different parameters")]
    IdempotencyConflict,

    /// The payment provider rejected the call or could not be reached.
    #[error("Payment provider error: {0}")]
    ProviderError(String),

    /// The webhook payload or signature could not be verified.
    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════

    /// The lock store could not be reached.
    #[error("Lock store unavailable: {0}")]
    StoreUnavailable(String),

    /// The system of record failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_numbers(numbers: &[NumberId]) -> String {
    numbers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl RaffleError {
    /// Shorthand for a missing entity.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoNumbersSelected => "NO_NUMBERS_SELECTED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RaffleNotActive => "RAFFLE_NOT_ACTIVE",
            Self::NumbersUnavailable { .. } => "NUMBERS_UNAVAILABLE",
            Self::NumberAlreadyInReservation(_) => "NUMBER_ALREADY_IN_RESERVATION",
            Self::NumberAlreadyReserved(_) => "NUMBER_ALREADY_RESERVED",
            Self::ReservationExpired => "RESERVATION_EXPIRED",
            Self::AlreadyConfirmed => "ALREADY_CONFIRMED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::AmountMismatch => "AMOUNT_MISMATCH",
            Self::PaymentNotCompleted => "PAYMENT_NOT_COMPLETED",
            Self::IdempotencyInProgress => "IDEMPOTENCY_IN_PROGRESS",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::ProviderError(_) => "PROVIDER_ERROR",
            Self::InvalidWebhook(_) => "INVALID_WEBHOOK",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status conventionally associated with this error.
    ///
    /// Recorded on failed idempotency rows so a replaying client sees the same status
    /// the original request produced.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NoNumbersSelected
            | Self::InvalidInput(_)
            | Self::InvalidAmount(_)
            | Self::InvalidWebhook(_)
            | Self::ReservationExpired
            | Self::PaymentNotCompleted
            | Self::InvalidTransition(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound { .. } => 404,
            Self::RaffleNotActive
            | Self::NumbersUnavailable { .. }
            | Self::NumberAlreadyInReservation(_)
            | Self::NumberAlreadyReserved(_)
            | Self::AlreadyConfirmed
            | Self::AmountMismatch
            | Self::IdempotencyInProgress
            | Self::IdempotencyConflict => 409,
            Self::ProviderError(_) => 502,
            Self::StoreUnavailable(_) => 503,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether a retry of the same request could succeed without the caller changing it.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderError(_)
                | Self::StoreUnavailable(_)
                | Self::Database(_)
                | Self::IdempotencyInProgress
        )
    }
}
