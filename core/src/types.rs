//! Domain types for raffle number reservations and payments.
//!
//! Value objects (identifiers, [`Money`]) and the entities the reservation engine and
//! payment coordinator operate on: [`Raffle`], [`Reservation`], [`Payment`], and
//! [`IdempotencyRecord`].

use crate::error::{RaffleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a raffle
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaffleId(Uuid);

impl RaffleId {
    /// Creates a new random `RaffleId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RaffleId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RaffleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an authenticated user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = RaffleError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| RaffleError::InvalidInput(format!("invalid user id: {e}")))
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random `PaymentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PaymentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A number within a raffle's pool.
///
/// Numbers are small integers assigned when the raffle is created; they are only
/// meaningful together with their [`RaffleId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberId(i32);

impl NumberId {
    /// Creates a `NumberId`
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw number
    #[must_use]
    pub const fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for NumberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Represents money in the currency's minor unit (cents)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Checks if the amount is strictly positive
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Multiplies a unit price by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: i64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

// ============================================================================
// Raffle
// ============================================================================

/// Lifecycle status of a raffle. Only `Active` raffles accept reservations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaffleStatus {
    /// Being set up by the organiser
    Draft,
    /// Open for reservations
    Active,
    /// Temporarily closed
    Suspended,
    /// Draw finished
    Completed,
    /// Called off
    Cancelled,
}

impl RaffleStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(RaffleError::Internal(format!("Invalid raffle status: {s}"))),
        }
    }
}

/// The subset of a raffle the reservation core reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Raffle {
    /// Raffle identifier
    pub id: RaffleId,
    /// Display title, used in payment descriptions
    pub title: String,
    /// Current status
    pub status: RaffleStatus,
    /// Price of a single number
    pub price_per_number: Money,
    /// Size of the number pool
    pub total_numbers: i32,
    /// Numbers sold so far
    pub sold_count: i32,
}

impl Raffle {
    /// Whether the raffle accepts reservations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RaffleStatus::Active
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Reservation status.
///
/// `Pending` is the only non-terminal state; `Confirmed`, `Expired` and `Cancelled`
/// are terminal and never change again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Numbers held, awaiting payment
    Pending,
    /// Paid; numbers are owned by the buyer
    Confirmed,
    /// Window elapsed without payment
    Expired,
    /// Released by the buyer or by a cancelled payment
    Cancelled,
}

impl ReservationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(RaffleError::Internal(format!(
                "Invalid reservation status: {s}"
            ))),
        }
    }

    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// States that hold numbers: pending (temporarily) or confirmed (permanently).
    #[must_use]
    pub const fn holds_numbers(&self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }
}

/// A user's temporary hold on a set of numbers within one raffle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Raffle the numbers belong to
    pub raffle_id: RaffleId,
    /// Buyer
    pub user_id: UserId,
    /// Held numbers, in request order
    pub number_ids: Vec<NumberId>,
    /// Client-generated key that makes creation retries safe
    pub session_id: String,
    /// `|number_ids| x price_per_number` at creation time
    pub total_amount: Money,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// End of the reservation window
    pub expires_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status or content change
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether the reservation window has elapsed at `now`.
    #[must_use]
    pub fn is_past_window(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Pending and still inside its window.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && !self.is_past_window(now)
    }

    /// Whether the reservation already holds `number`.
    #[must_use]
    pub fn contains(&self, number: NumberId) -> bool {
        self.number_ids.contains(&number)
    }

    /// Price of one number at the time the reservation was created.
    ///
    /// Returns `None` for an empty reservation, which cannot exist once persisted.
    #[must_use]
    pub fn unit_price(&self) -> Option<Money> {
        let count = i64::try_from(self.number_ids.len()).ok().filter(|c| *c > 0)?;
        Some(Money::from_cents(self.total_amount.cents() / count))
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Payment status.
///
/// `Succeeded` is reachable only from `Pending` or `Processing`, and `Refunded`
/// only from `Succeeded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Intent created, buyer has not paid
    Pending,
    /// Provider is processing the charge
    Processing,
    /// Funds captured
    Succeeded,
    /// Last attempt failed; the intent can be retried
    Failed,
    /// Intent cancelled
    Cancelled,
    /// Funds returned
    Refunded,
}

impl PaymentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(RaffleError::Internal(format!("Invalid payment status: {s}"))),
        }
    }

    /// The charge is still open at the provider.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// Metadata attached to the provider intent so provider-side records can be
/// traced back to the reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// Reservation being paid
    pub reservation_id: ReservationId,
    /// Raffle of the reservation
    pub raffle_id: RaffleId,
    /// Buyer
    pub user_id: UserId,
    /// Number of numbers purchased
    pub number_count: usize,
    /// Comma-separated numbers
    pub number_ids: String,
    /// Raffle title at payment time
    pub raffle_title: String,
}

impl PaymentMetadata {
    /// Flatten into the key/value pairs providers accept as metadata.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("reservation_id".to_string(), self.reservation_id.to_string()),
            ("raffle_id".to_string(), self.raffle_id.to_string()),
            ("user_id".to_string(), self.user_id.to_string()),
            ("number_count".to_string(), self.number_count.to_string()),
            ("number_ids".to_string(), self.number_ids.clone()),
            ("raffle_title".to_string(), self.raffle_title.clone()),
        ]
    }
}

/// A monetary transaction against exactly one reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier
    pub id: PaymentId,
    /// Reservation being paid (unique per payment)
    pub reservation_id: ReservationId,
    /// Buyer
    pub user_id: UserId,
    /// Raffle of the reservation
    pub raffle_id: RaffleId,
    /// Provider's intent identifier
    pub provider_intent_id: String,
    /// Secret the client uses to complete payment with the provider
    pub client_secret: String,
    /// Amount charged; equals the reservation total
    pub amount: Money,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Provider payment method, once known
    pub payment_method: Option<String>,
    /// Last failure reason reported by the provider
    pub error_message: Option<String>,
    /// Metadata sent to the provider
    pub metadata: PaymentMetadata,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Time the payment succeeded
    pub paid_at: Option<DateTime<Utc>>,
}

/// A guarded status change applied to a stored payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentUpdate {
    /// New status
    pub status: PaymentStatus,
    /// Payment method to record (kept when `None`)
    pub payment_method: Option<String>,
    /// Failure reason to record (kept when `None`)
    pub error_message: Option<String>,
    /// Success time to record (kept when `None`)
    pub paid_at: Option<DateTime<Utc>>,
    /// Modification time
    pub updated_at: DateTime<Utc>,
}

impl PaymentUpdate {
    /// A bare status change.
    #[must_use]
    pub const fn status(status: PaymentStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            payment_method: None,
            error_message: None,
            paid_at: None,
            updated_at: now,
        }
    }

    /// Record the payment method.
    #[must_use]
    pub fn with_payment_method(mut self, method: Option<String>) -> Self {
        self.payment_method = method;
        self
    }

    /// Record a failure reason.
    #[must_use]
    pub fn with_error(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }

    /// Record the success time.
    #[must_use]
    pub const fn with_paid_at(mut self, at: DateTime<Utc>) -> Self {
        self.paid_at = Some(at);
        self
    }

    /// Apply this update to an in-memory payment.
    pub fn apply_to(&self, payment: &mut Payment) {
        payment.status = self.status;
        if let Some(method) = &self.payment_method {
            payment.payment_method = Some(method.clone());
        }
        if let Some(message) = &self.error_message {
            payment.error_message = Some(message.clone());
        }
        if let Some(at) = self.paid_at {
            payment.paid_at = Some(at);
        }
        payment.updated_at = self.updated_at;
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// State of an idempotency row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// The first request is still executing
    Processing,
    /// Response is cached and replayed to retries
    Completed,
    /// The first request failed; a retry runs the operation again
    Failed,
}

impl IdempotencyStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(RaffleError::Internal(format!(
                "Invalid idempotency status: {s}"
            ))),
        }
    }
}

/// Cached outcome of a side-effecting request, keyed by `(key, user_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Client-supplied key
    pub key: String,
    /// Caller the key is scoped to
    pub user_id: UserId,
    /// Operation the key was used for
    pub request_path: String,
    /// Canonical JSON of the request parameters
    pub request_params: String,
    /// SHA-256 of `request_params`, hex encoded
    pub request_hash: String,
    /// Status code of the cached response
    pub response_status: Option<u16>,
    /// Cached response body (JSON)
    pub response_body: Option<String>,
    /// Row state
    pub status: IdempotencyStatus,
    /// First use
    pub created_at: DateTime<Utc>,
    /// Time the outcome was recorded
    pub completed_at: Option<DateTime<Utc>>,
    /// Rows past this instant are ignored and purged
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the row has outlived its retention window.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(numbers: &[i32], total: i64) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: ReservationId::new(),
            raffle_id: RaffleId::new(),
            user_id: UserId::new(),
            number_ids: numbers.iter().copied().map(NumberId::new).collect(),
            session_id: "s".to_string(),
            total_amount: Money::from_cents(total),
            status: ReservationStatus::Pending,
            expires_at: now + Duration::minutes(5),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn money_display_uses_two_decimals() {
        assert_eq!(Money::from_cents(1050).to_string(), "10.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn money_checked_mul_detects_overflow() {
        assert_eq!(
            Money::from_cents(500).checked_mul(3),
            Some(Money::from_cents(1500))
        );
        assert_eq!(Money::from_cents(i64::MAX).checked_mul(2), None);
    }

    #[test]
    fn unit_price_divides_total() {
        assert_eq!(
            reservation(&[1, 2, 3], 1500).unit_price(),
            Some(Money::from_cents(500))
        );
        assert_eq!(reservation(&[], 0).unit_price(), None);
    }

    #[test]
    fn live_requires_pending_within_window() {
        let mut r = reservation(&[1], 100);
        let now = r.created_at;
        assert!(r.is_live(now));
        assert!(!r.is_live(r.expires_at + Duration::seconds(1)));
        r.status = ReservationStatus::Confirmed;
        assert!(!r.is_live(now));
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Expired,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Ok(status));
        }
        assert!(PaymentStatus::parse("bogus").is_err());
    }

    #[test]
    fn payment_update_keeps_unset_fields() {
        let now = Utc::now();
        let r = reservation(&[1], 100);
        let mut payment = Payment {
            id: PaymentId::new(),
            reservation_id: r.id,
            user_id: r.user_id,
            raffle_id: r.raffle_id,
            provider_intent_id: "pi_1".into(),
            client_secret: "secret".into(),
            amount: r.total_amount,
            currency: "usd".into(),
            status: PaymentStatus::Pending,
            payment_method: Some("pm_card".into()),
            error_message: None,
            metadata: PaymentMetadata {
                reservation_id: r.id,
                raffle_id: r.raffle_id,
                user_id: r.user_id,
                number_count: 1,
                number_ids: "1".into(),
                raffle_title: "Prize".into(),
            },
            created_at: now,
            updated_at: now,
            paid_at: None,
        };

        PaymentUpdate::status(PaymentStatus::Succeeded, now)
            .with_paid_at(now)
            .apply_to(&mut payment);

        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.payment_method.as_deref(), Some("pm_card"));
        assert_eq!(payment.paid_at, Some(now));
    }
}
