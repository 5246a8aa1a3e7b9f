//! # Event Outbox
//!
//! Transactional event queue for downstream consumers.
//!
//! ## Outbox Pattern
//! ```text
//! settlement commit (one transaction)
//!   ├── sale / payment / ledger writes
//!   └── INSERT INTO event_outbox (...)      ← same transaction
//!
//! consumer loop (receipts, statements, reporting)
//!   ├── drain_pending(limit)
//!   ├── deliver
//!   └── mark_dispatched(ids)
//! ```
//!
//! Because the event row commits atomically with the writes it describes, a
//! consumer can never observe an event for state that does not exist, and a
//! crash cannot lose an event for state that does.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;

// =============================================================================
// Event Kinds
// =============================================================================

/// Sale settled in full on first pass.
pub const EVENT_SALE_SETTLED: &str = "settlement.settled";
/// Sale settled partially; a lay-bye schedule was opened.
pub const EVENT_LAYBYE_OPENED: &str = "settlement.laybye_opened";
/// An installment was recorded against a schedule.
pub const EVENT_LAYBYE_INSTALLMENT: &str = "laybye.installment";
/// A schedule reached completed; the owning sale settled.
pub const EVENT_LAYBYE_COMPLETED: &str = "laybye.completed";
/// A schedule was cancelled; the owning sale was voided.
pub const EVENT_LAYBYE_CANCELLED: &str = "laybye.cancelled";
/// A settled sale was voided.
pub const EVENT_SALE_VOIDED: &str = "sale.voided";
/// A credit account balance moved. Payload is the CreditTransaction.
pub const EVENT_CREDIT_TXN: &str = "credit.txn";

// =============================================================================
// Outbox Event
// =============================================================================

/// One queued event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: String,
    pub kind: String,
    pub entity_id: String,
    /// JSON payload; the shape depends on `kind`.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Transactional event queue.
#[derive(Debug, Clone)]
pub struct EventOutbox {
    pool: SqlitePool,
}

impl EventOutbox {
    /// Creates a new EventOutbox.
    pub fn new(pool: SqlitePool) -> Self {
        EventOutbox { pool }
    }

    /// Queues an event inside the caller's transaction.
    pub async fn enqueue_in_tx<T: Serialize>(
        conn: &mut SqliteConnection,
        kind: &str,
        entity_id: &str,
        payload: &T,
    ) -> EngineResult<()> {
        let body = serde_json::to_string(payload)?;

        debug!(kind, entity_id, "queueing outbox event");

        sqlx::query(
            r#"
            INSERT INTO event_outbox (id, kind, entity_id, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(kind)
        .bind(entity_id)
        .bind(body)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Returns up to `limit` undispatched events, oldest first.
    pub async fn drain_pending(&self, limit: i64) -> EngineResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT id, kind, entity_id, payload, created_at, dispatched_at
            FROM event_outbox
            WHERE dispatched_at IS NULL
            ORDER BY created_at, id
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Acknowledges delivered events.
    pub async fn mark_dispatched(&self, ids: &[String]) -> EngineResult<()> {
        let now = Utc::now();

        for id in ids {
            sqlx::query("UPDATE event_outbox SET dispatched_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}
