//! # Catalog Repository
//!
//! Product lookups and stock adjustment for settlement.
//!
//! Catalog *management* (create/edit/search) belongs to the surrounding
//! application; the engine only needs to read snapshot fields and move
//! stock at commit time.
//!
//! ## Stock Adjustment Under Concurrency
//! ```text
//! WRONG (read-modify-write):          RIGHT (single guarded UPDATE):
//!   stock = SELECT current_stock        UPDATE products
//!   UPDATE ... SET stock = stock - 3    SET current_stock = current_stock - 3
//!                                       WHERE id = ? AND (stock suffices
//!   Terminal A and B both read 5,             OR negatives allowed)
//!   both write 2. One sale is lost.     Zero rows → the other sale won.
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use vela_core::Product;

/// Repository for catalog reads and settlement-time stock movement.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Gets a product by id.
    pub async fn get_by_id(&self, id: &str) -> EngineResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, sku, name, price_cents, tax_rate_bps,
                   track_inventory, allow_negative_stock, current_stock,
                   is_active, created_at, updated_at
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Inserts a product. Used by seeding and by the admin surface above
    /// the engine.
    pub async fn insert(&self, product: &Product) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, price_cents, tax_rate_bps,
                track_inventory, allow_negative_stock, current_stock,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.tax_rate_bps)
        .bind(product.track_inventory)
        .bind(product.allow_negative_stock)
        .bind(product.current_stock)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Decrements stock for a tracked product inside the caller's
    /// transaction.
    ///
    /// The guard re-checks availability at write time, so two concurrent
    /// sales draining the same product cannot both succeed past zero unless
    /// the product allows negative stock. Untracked products are untouched
    /// by the `track_inventory` clause.
    pub async fn decrement_stock_in_tx(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        quantity: i64,
    ) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET current_stock = current_stock - ?2, updated_at = ?3
            WHERE id = ?1
              AND track_inventory = 1
              AND (allow_negative_stock = 1 OR COALESCE(current_stock, 0) >= ?2)
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!("stock for product {product_id} changed underneath the sale"),
            });
        }

        debug!(product_id, quantity, "stock decremented");
        Ok(())
    }

    /// Returns stock for a tracked product inside the caller's transaction
    /// (void and lay-bye cancellation).
    pub async fn restock_in_tx(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
        quantity: i64,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = COALESCE(current_stock, 0) + ?2, updated_at = ?3
            WHERE id = ?1 AND track_inventory = 1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        debug!(product_id, quantity, "stock returned");
        Ok(())
    }
}
