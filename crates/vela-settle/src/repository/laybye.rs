//! # Lay-bye Schedule Repository
//!
//! Row operations for lay-bye schedules. The state machine lives in
//! [`crate::laybye`]; this module only moves rows, always behind guarded
//! UPDATEs so racing installments cannot both apply against the same
//! running balance.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use vela_core::{LaybyeSchedule, LaybyeStatus};

const SELECT_SCHEDULE: &str = r#"
    SELECT sale_id, total_due_cents, amount_paid_cents, due_date,
           status, created_at, updated_at
    FROM laybye_schedules
"#;

/// Repository for lay-bye schedule rows.
#[derive(Debug, Clone)]
pub struct LaybyeRepository {
    pool: SqlitePool,
}

impl LaybyeRepository {
    /// Creates a new LaybyeRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LaybyeRepository { pool }
    }

    /// Gets a schedule by its owning sale id.
    pub async fn get(&self, sale_id: &str) -> EngineResult<Option<LaybyeSchedule>> {
        let schedule =
            sqlx::query_as::<_, LaybyeSchedule>(&format!("{SELECT_SCHEDULE} WHERE sale_id = ?1"))
                .bind(sale_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(schedule)
    }

    /// Inserts a new active schedule inside the caller's transaction.
    pub async fn insert_in_tx(
        &self,
        conn: &mut SqliteConnection,
        schedule: &LaybyeSchedule,
    ) -> EngineResult<()> {
        debug!(
            sale_id = %schedule.sale_id,
            total_due = schedule.total_due_cents,
            paid = schedule.amount_paid_cents,
            "opening lay-bye schedule"
        );

        sqlx::query(
            r#"
            INSERT INTO laybye_schedules (
                sale_id, total_due_cents, amount_paid_cents, due_date,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&schedule.sale_id)
        .bind(schedule.total_due_cents)
        .bind(schedule.amount_paid_cents)
        .bind(schedule.due_date)
        .bind(schedule.status)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Advances the running balance and status inside the caller's
    /// transaction.
    ///
    /// Guarded on the previous `amount_paid_cents`: if a concurrent
    /// installment moved the balance first, zero rows come back and the
    /// caller's transaction rolls back.
    pub async fn update_progress_in_tx(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        previous_paid_cents: i64,
        new_paid_cents: i64,
        new_status: LaybyeStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE laybye_schedules
            SET amount_paid_cents = ?3, status = ?4, updated_at = ?5
            WHERE sale_id = ?1 AND amount_paid_cents = ?2 AND status IN (?6, ?7)
            "#,
        )
        .bind(sale_id)
        .bind(previous_paid_cents)
        .bind(new_paid_cents)
        .bind(new_status)
        .bind(now)
        .bind(LaybyeStatus::Active)
        .bind(LaybyeStatus::Overdue)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!("lay-bye schedule {sale_id} advanced concurrently"),
            });
        }

        Ok(())
    }

    /// Cancels a payable schedule inside the caller's transaction. Guarded.
    pub async fn mark_cancelled_in_tx(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE laybye_schedules
            SET status = ?2, updated_at = ?3
            WHERE sale_id = ?1 AND status IN (?4, ?5)
            "#,
        )
        .bind(sale_id)
        .bind(LaybyeStatus::Cancelled)
        .bind(now)
        .bind(LaybyeStatus::Active)
        .bind(LaybyeStatus::Overdue)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!("lay-bye schedule {sale_id} is not cancellable"),
            });
        }

        Ok(())
    }

    /// Flips active schedules past their due date to overdue. Returns the
    /// affected sale ids.
    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let due: Vec<String> = sqlx::query_scalar(
            "SELECT sale_id FROM laybye_schedules WHERE status = ?1 AND due_date < ?2",
        )
        .bind(LaybyeStatus::Active)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if due.is_empty() {
            return Ok(due);
        }

        sqlx::query(
            r#"
            UPDATE laybye_schedules
            SET status = ?2, updated_at = ?3
            WHERE status = ?1 AND due_date < ?3
            "#,
        )
        .bind(LaybyeStatus::Active)
        .bind(LaybyeStatus::Overdue)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(due)
    }
}
