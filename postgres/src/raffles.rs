use crate::PostgresStore;
use crate::rows::{db_error, numbers_param, raffle_from_row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raffle_core::error::Result;
use raffle_core::repository::RaffleRepository;
use raffle_core::types::{Money, NumberId, Raffle, RaffleId, RaffleStatus};
use sqlx::Row;

impl PostgresStore {
    /// Create a raffle and seed numbers `1..=total_numbers`.
    ///
    /// Raffle administration lives outside this service; this exists for seeding and
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns [`raffle_core::RaffleError::Database`] if the insert fails.
    pub async fn create_raffle(
        &self,
        title: &str,
        status: RaffleStatus,
        price_per_number: Money,
        total_numbers: i32,
    ) -> Result<RaffleId> {
        let id = RaffleId::new();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r"
            INSERT INTO raffles (id, title, status, price_per_number, total_numbers)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(id.as_uuid())
        .bind(title)
        .bind(status.as_str())
        .bind(price_per_number.cents())
        .bind(total_numbers)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r"
            INSERT INTO raffle_numbers (raffle_id, number_id)
            SELECT $1, n FROM generate_series(1, $2) AS n
            ",
        )
        .bind(id.as_uuid())
        .bind(total_numbers)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::info!(raffle_id = %id, total_numbers, "Raffle created");
        Ok(id)
    }

    /// Current owner of a number, if sold.
    ///
    /// # Errors
    ///
    /// Returns [`raffle_core::RaffleError::Database`] if the query fails.
    pub async fn number_owner(
        &self,
        raffle_id: RaffleId,
        number_id: NumberId,
    ) -> Result<Option<raffle_core::types::UserId>> {
        let row = sqlx::query(
            "SELECT owner_id FROM raffle_numbers WHERE raffle_id = $1 AND number_id = $2",
        )
        .bind(raffle_id.as_uuid())
        .bind(number_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => {
                let owner: Option<uuid::Uuid> = row.try_get("owner_id").map_err(db_error)?;
                Ok(owner.map(raffle_core::types::UserId::from_uuid))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RaffleRepository for PostgresStore {
    async fn get_raffle(&self, id: RaffleId) -> Result<Option<Raffle>> {
        let row = sqlx::query(
            r"
            SELECT id, title, status, price_per_number, total_numbers, sold_count
            FROM raffles
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(raffle_from_row).transpose()
    }

    async fn unavailable_numbers(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
    ) -> Result<Vec<NumberId>> {
        let rows = sqlx::query(
            r"
            SELECT requested.n AS number_id
            FROM unnest($2::INTEGER[]) AS requested(n)
            LEFT JOIN raffle_numbers rn
                ON rn.raffle_id = $1 AND rn.number_id = requested.n
            WHERE rn.number_id IS NULL OR rn.owner_id IS NOT NULL
            ORDER BY requested.n
            ",
        )
        .bind(raffle_id.as_uuid())
        .bind(numbers_param(numbers))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                row.try_get::<i32, _>("number_id")
                    .map(NumberId::new)
                    .map_err(db_error)
            })
            .collect()
    }

    async fn mark_reserved(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
        until: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE raffle_numbers
            SET reserved_until = $3
            WHERE raffle_id = $1 AND number_id = ANY($2) AND owner_id IS NULL
            ",
        )
        .bind(raffle_id.as_uuid())
        .bind(numbers_param(numbers))
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn clear_reserved(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<()> {
        sqlx::query(
            r"
            UPDATE raffle_numbers
            SET reserved_until = NULL
            WHERE raffle_id = $1 AND number_id = ANY($2) AND owner_id IS NULL
            ",
        )
        .bind(raffle_id.as_uuid())
        .bind(numbers_param(numbers))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
