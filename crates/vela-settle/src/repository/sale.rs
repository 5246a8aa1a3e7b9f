//! # Sale Repository
//!
//! Database operations for sales, sale lines, and payment lines.
//!
//! ## Sale Lifecycle
//! ```text
//! settle_sale()
//!   ├── insert_sale_in_tx()          status: settled | partially_settled
//!   ├── insert_line_in_tx()          snapshot per cart line
//!   └── insert_payment_line_in_tx()  one per accepted tender
//!
//! lay-bye completion
//!   └── mark_settled_in_tx()         partially_settled → settled
//!
//! void / cancellation
//!   └── mark_voided_in_tx()          settled | partially_settled → voided
//! ```
//!
//! Status transitions are guarded UPDATEs: the WHERE clause names the
//! expected current status, and zero affected rows means a concurrent
//! writer got there first.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use vela_core::{PaymentLine, Sale, SaleLine, SaleStatus};

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by id.
    pub async fn get_by_id(&self, id: &str) -> EngineResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(
            r#"
            SELECT id, branch_id, customer_id,
                   subtotal_cents, tax_cents, discount_cents, total_cents,
                   status, created_at, updated_at, settled_at
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets all line items for a sale, in insertion order.
    pub async fn get_lines(&self, sale_id: &str) -> EngineResult<Vec<SaleLine>> {
        let lines = sqlx::query_as::<_, SaleLine>(
            r#"
            SELECT id, sale_id, product_id, sku_snapshot, name_snapshot,
                   unit_price_cents, quantity, line_discount_cents,
                   line_total_cents, tax_cents, created_at
            FROM sale_lines
            WHERE sale_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Gets all payment lines for a sale, in insertion order.
    pub async fn get_payment_lines(&self, sale_id: &str) -> EngineResult<Vec<PaymentLine>> {
        let lines = sqlx::query_as::<_, PaymentLine>(
            r#"
            SELECT id, sale_id, method, amount_cents, reference, created_at
            FROM payment_lines
            WHERE sale_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    /// Sum of payment line amounts for a sale.
    pub async fn total_paid_cents(&self, sale_id: &str) -> EngineResult<i64> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT SUM(amount_cents) FROM payment_lines WHERE sale_id = ?1")
                .bind(sale_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(total.unwrap_or(0))
    }

    /// Inserts a sale row inside the caller's transaction.
    pub async fn insert_sale_in_tx(
        &self,
        conn: &mut SqliteConnection,
        sale: &Sale,
    ) -> EngineResult<()> {
        debug!(id = %sale.id, status = ?sale.status, total = sale.total_cents, "inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, branch_id, customer_id,
                subtotal_cents, tax_cents, discount_cents, total_cents,
                status, created_at, updated_at, settled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.branch_id)
        .bind(&sale.customer_id)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.discount_cents)
        .bind(sale.total_cents)
        .bind(sale.status)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.settled_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Inserts a sale line inside the caller's transaction.
    pub async fn insert_line_in_tx(
        &self,
        conn: &mut SqliteConnection,
        line: &SaleLine,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_lines (
                id, sale_id, product_id, sku_snapshot, name_snapshot,
                unit_price_cents, quantity, line_discount_cents,
                line_total_cents, tax_cents, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&line.id)
        .bind(&line.sale_id)
        .bind(&line.product_id)
        .bind(&line.sku_snapshot)
        .bind(&line.name_snapshot)
        .bind(line.unit_price_cents)
        .bind(line.quantity)
        .bind(line.line_discount_cents)
        .bind(line.line_total_cents)
        .bind(line.tax_cents)
        .bind(line.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Inserts a payment line inside the caller's transaction.
    pub async fn insert_payment_line_in_tx(
        &self,
        conn: &mut SqliteConnection,
        line: &PaymentLine,
    ) -> EngineResult<()> {
        debug!(
            sale_id = %line.sale_id,
            method = ?line.method,
            amount = line.amount_cents,
            "recording payment line"
        );

        sqlx::query(
            r#"
            INSERT INTO payment_lines (id, sale_id, method, amount_cents, reference, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&line.id)
        .bind(&line.sale_id)
        .bind(line.method)
        .bind(line.amount_cents)
        .bind(&line.reference)
        .bind(line.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Transitions a partially-settled sale to settled. Guarded.
    pub async fn mark_settled_in_tx(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET status = ?2, settled_at = ?3, updated_at = ?3
            WHERE id = ?1 AND status = ?4
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Settled)
        .bind(now)
        .bind(SaleStatus::PartiallySettled)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!("sale {sale_id} is no longer partially settled"),
            });
        }

        Ok(())
    }

    /// Voids a settled or partially-settled sale. Guarded.
    pub async fn mark_voided_in_tx(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sales SET status = ?2, updated_at = ?3
            WHERE id = ?1 AND status IN (?4, ?5)
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Voided)
        .bind(now)
        .bind(SaleStatus::Settled)
        .bind(SaleStatus::PartiallySettled)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!("sale {sale_id} is not in a voidable state"),
            });
        }

        Ok(())
    }
}
