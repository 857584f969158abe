use crate::PostgresStore;
use crate::rows::{RESERVATION_COLUMNS, db_error, limit_param, numbers_param, reservation_from_row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raffle_core::error::Result;
use raffle_core::repository::ReservationRepository;
use raffle_core::types::{
    Money, NumberId, RaffleId, Reservation, ReservationId, ReservationStatus, UserId,
};

fn collect(rows: &[sqlx::postgres::PgRow]) -> Result<Vec<Reservation>> {
    rows.iter().map(reservation_from_row).collect()
}

#[async_trait]
impl ReservationRepository for PostgresStore {
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO reservations (
                id, raffle_id, user_id, number_ids, session_id,
                total_amount, status, expires_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.raffle_id.as_uuid())
        .bind(reservation.user_id.as_uuid())
        .bind(numbers_param(&reservation.number_ids))
        .bind(&reservation.session_id)
        .bind(reservation.total_amount.cents())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let query = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn find_by_session(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Option<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 AND session_id = $2 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn list_reservations_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        collect(&rows)
    }

    async fn find_active(
        &self,
        user_id: UserId,
        raffle_id: RaffleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 AND raffle_id = $2 AND status = 'pending' AND expires_at >= $3 \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(user_id.as_uuid())
            .bind(raffle_id.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn count_overlapping(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM reservations
            WHERE raffle_id = $1
              AND status IN ('pending', 'confirmed')
              AND number_ids && $2::INTEGER[]
            ",
        )
        .bind(raffle_id.as_uuid())
        .bind(numbers_param(numbers))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn confirm_reservation(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // The stored number set wins over the caller's copy, which may predate an add.
        let moved: Option<(Vec<i32>,)> = sqlx::query_as(
            r"
            UPDATE reservations
            SET status = 'confirmed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING number_ids
            ",
        )
        .bind(reservation.id.as_uuid())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        let Some((numbers,)) = moved else {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        };

        let owned = sqlx::query(
            r"
            UPDATE raffle_numbers
            SET owner_id = $3, reserved_until = NULL, sold_at = $4
            WHERE raffle_id = $1 AND number_id = ANY($2) AND owner_id IS NULL
            ",
        )
        .bind(reservation.raffle_id.as_uuid())
        .bind(&numbers)
        .bind(reservation.user_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let sold = i32::try_from(numbers.len()).unwrap_or(i32::MAX);
        sqlx::query(
            "UPDATE raffles SET sold_count = sold_count + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(reservation.raffle_id.as_uuid())
        .bind(sold)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        if owned.rows_affected() != numbers.len() as u64 {
            tracing::warn!(
                reservation_id = %reservation.id,
                expected = numbers.len(),
                assigned = owned.rows_affected(),
                "Some numbers already had an owner at confirmation"
            );
        }
        Ok(true)
    }

    async fn append_number(
        &self,
        id: ReservationId,
        number: NumberId,
        new_total: Money,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE reservations
            SET number_ids = array_append(number_ids, $2),
                total_amount = $3,
                updated_at = $4
            WHERE id = $1 AND status = 'pending' AND NOT ($2 = ANY(number_ids))
            ",
        )
        .bind(id.as_uuid())
        .bind(number.value())
        .bind(new_total.cents())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'pending' AND expires_at < $1 \
             ORDER BY expires_at ASC LIMIT $2"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        collect(&rows)
    }

    async fn list_unowned_confirmed(&self, limit: usize) -> Result<Vec<Reservation>> {
        let query = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations r \
             WHERE r.status = 'confirmed' AND EXISTS ( \
                 SELECT 1 FROM raffle_numbers rn \
                 WHERE rn.raffle_id = r.raffle_id \
                   AND rn.number_id = ANY(r.number_ids) \
                   AND rn.owner_id IS NULL) \
             ORDER BY r.updated_at ASC LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        collect(&rows)
    }

    async fn assign_owners(&self, reservation: &Reservation) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE raffle_numbers
            SET owner_id = $3, reserved_until = NULL, sold_at = now()
            WHERE raffle_id = $1 AND number_id = ANY($2) AND owner_id IS NULL
            ",
        )
        .bind(reservation.raffle_id.as_uuid())
        .bind(numbers_param(&reservation.number_ids))
        .bind(reservation.user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
