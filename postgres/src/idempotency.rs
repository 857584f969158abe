use crate::PostgresStore;
use crate::rows::{IDEMPOTENCY_COLUMNS, db_error, record_from_row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raffle_core::error::Result;
use raffle_core::repository::{IdempotencyOutcome, IdempotencyRepository};
use raffle_core::types::{IdempotencyRecord, UserId};

#[async_trait]
impl IdempotencyRepository for PostgresStore {
    async fn get_record(&self, key: &str, user_id: UserId) -> Result<Option<IdempotencyRecord>> {
        let query = format!(
            "SELECT {IDEMPOTENCY_COLUMNS} FROM idempotency_keys WHERE key = $1 AND user_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(key)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn try_begin(&self, record: &IdempotencyRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO idempotency_keys (
                key, user_id, request_path, request_params, request_hash,
                status, created_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (key, user_id) DO NOTHING
            ",
        )
        .bind(&record.key)
        .bind(record.user_id.as_uuid())
        .bind(&record.request_path)
        .bind(&record.request_params)
        .bind(&record.request_hash)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish(
        &self,
        key: &str,
        user_id: UserId,
        outcome: IdempotencyOutcome<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE idempotency_keys
            SET status = $3, response_status = $4, response_body = $5, completed_at = $6
            WHERE key = $1 AND user_id = $2
            ",
        )
        .bind(key)
        .bind(user_id.as_uuid())
        .bind(outcome.status.as_str())
        .bind(i32::from(outcome.response_status))
        .bind(outcome.response_body)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_record(&self, key: &str, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND user_id = $2")
            .bind(key)
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired idempotency keys");
        }
        Ok(purged)
    }
}
