use crate::PostgresStore;
use crate::rows::{PAYMENT_COLUMNS, db_error, payment_from_row};
use async_trait::async_trait;
use raffle_core::error::{RaffleError, Result};
use raffle_core::repository::PaymentRepository;
use raffle_core::types::{Payment, PaymentId, PaymentStatus, PaymentUpdate, ReservationId, UserId};

#[async_trait]
impl PaymentRepository for PostgresStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<bool> {
        let metadata = serde_json::to_value(&payment.metadata)
            .map_err(|e| RaffleError::Internal(format!("payment metadata: {e}")))?;

        // Unique constraints on reservation_id and provider_intent_id decide the race.
        let result = sqlx::query(
            r"
            INSERT INTO payments (
                id, reservation_id, user_id, raffle_id, provider_intent_id, client_secret,
                amount, currency, status, payment_method, error_message, metadata,
                created_at, updated_at, paid_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.reservation_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.raffle_id.as_uuid())
        .bind(&payment.provider_intent_id)
        .bind(&payment.client_secret)
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.payment_method.as_deref())
        .bind(payment.error_message.as_deref())
        .bind(metadata)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.paid_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reservation_id = $1");
        let row = sqlx::query(&query)
            .bind(reservation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider_intent_id = $1");
        let row = sqlx::query(&query)
            .bind(provider_intent_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn update_payment(
        &self,
        id: PaymentId,
        from: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> Result<bool> {
        let from: Vec<&str> = from.iter().map(PaymentStatus::as_str).collect();
        let result = sqlx::query(
            r"
            UPDATE payments
            SET status = $3,
                payment_method = COALESCE($4, payment_method),
                error_message = COALESCE($5, error_message),
                paid_at = COALESCE($6, paid_at),
                updated_at = $7
            WHERE id = $1 AND status = ANY($2)
            ",
        )
        .bind(id.as_uuid())
        .bind(&from)
        .bind(update.status.as_str())
        .bind(update.payment_method.as_deref())
        .bind(update.error_message.as_deref())
        .bind(update.paid_at)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let applied = result.rows_affected() == 1;
        if applied {
            tracing::debug!(payment_id = %id, status = update.status.as_str(), "Payment updated");
        }
        Ok(applied)
    }
}
