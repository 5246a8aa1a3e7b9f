//! # Database Migrations
//!
//! Embedded SQL migrations for the settlement schema.
//!
//! The `sqlx::migrate!()` macro embeds every file under
//! `migrations/sqlite/` into the binary at compile time; applied versions
//! are tracked in `_sqlx_migrations`. Never modify an existing migration,
//! always add a new `NNN_description.sql` file.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::EngineResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations.
///
/// Idempotent and ordered; each migration runs in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> EngineResult<()> {
    info!("checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("all migrations applied");
    Ok(())
}

/// Returns (total embedded, applied) migration counts, for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> EngineResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
