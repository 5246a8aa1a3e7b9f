//! # Ledger Store
//!
//! Durable record of customer credit accounts, their balances, and the
//! append-only transaction ledger behind them. Every other component sits
//! on top of this one.
//!
//! ## Reservation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Credit Reservation Flow                         │
//! │                                                                     │
//! │  reserve(account, 150)                                              │
//! │       │  per-account lock; balance + pending holds + 150 <= limit   │
//! │       ▼                                                             │
//! │  CreditHold (in memory, expires after reservation_ttl)              │
//! │       │                                                             │
//! │       ├── commit_reservation(token, sale, line)                     │
//! │       │      └── INSERT credit_transactions + UPDATE balance        │
//! │       │          (idempotent: token is UNIQUE on the ledger row)    │
//! │       │                                                             │
//! │       ├── release(token)            sale cancelled / tender refused │
//! │       │                                                             │
//! │       └── sweep_expired(now)        abandoned by a crashed client   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization Discipline
//! The read-check-insert in [`LedgerStore::reserve`] runs under a
//! per-account `tokio::sync::Mutex`, so two racing reservations on the same
//! account can never both pass a limit only one of them fits under. Lock
//! acquisition is bounded by the configured timeout; a stuck caller gets
//! `Timeout` instead of freezing credit processing for other terminals.
//!
//! Commits do not take the account lock: the balance update is a single
//! guarded UPDATE whose WHERE clause re-checks the limit, so even a writer
//! outside this process cannot push a balance past its ceiling.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::repository::outbox::{EventOutbox, EVENT_CREDIT_TXN};
use vela_core::validation::{validate_amount_cents, validate_credit_limit_cents};
use vela_core::{CoreError, CreditAccount, CreditTransaction, Money};

const SELECT_ACCOUNT: &str = r#"
    SELECT id, customer_id, credit_limit_cents, current_balance_cents,
           is_active, created_at, updated_at
    FROM credit_accounts
"#;

const SELECT_TXN: &str = r#"
    SELECT id, account_id, delta_cents, cause_sale_id,
           cause_payment_line_id, reservation_id, created_at
    FROM credit_transactions
"#;

// =============================================================================
// Reservation Token
// =============================================================================

/// Opaque handle for a pending credit hold.
///
/// The token doubles as the idempotency key: it is persisted on the ledger
/// row at commit, so retrying a commit with the same token yields the
/// original entry instead of a second charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationToken(Uuid);

impl ReservationToken {
    fn new() -> Self {
        ReservationToken(Uuid::new_v4())
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A pending hold against an account's available credit.
#[derive(Debug, Clone)]
struct CreditHold {
    account_id: String,
    amount_cents: i64,
    sale_id: Option<String>,
    expires_at: DateTime<Utc>,
}

// =============================================================================
// Ledger Store
// =============================================================================

/// Shared mutable ledger state: per-account locks and pending holds.
#[derive(Debug, Default)]
struct LedgerState {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    holds: StdMutex<HashMap<ReservationToken, CreditHold>>,
}

/// The Ledger Store.
///
/// Cloning is cheap and clones share the hold table, so every component in
/// one engine sees the same pending reservations.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
    state: Arc<LedgerState>,
    lock_timeout: Duration,
    reservation_ttl: Duration,
}

impl LedgerStore {
    /// Creates a ledger store over the given pool.
    pub fn new(pool: SqlitePool, config: &EngineConfig) -> Self {
        LedgerStore {
            pool,
            state: Arc::new(LedgerState::default()),
            lock_timeout: config.ledger_lock_timeout,
            reservation_ttl: config.reservation_ttl,
        }
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Opens a credit account for a customer.
    pub async fn create_account(
        &self,
        customer_id: &str,
        credit_limit: Money,
    ) -> EngineResult<CreditAccount> {
        validate_credit_limit_cents(credit_limit.cents()).map_err(CoreError::from)?;

        let now = Utc::now();
        let account = CreditAccount {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            credit_limit_cents: credit_limit.cents(),
            current_balance_cents: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO credit_accounts (
                id, customer_id, credit_limit_cents, current_balance_cents,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&account.id)
        .bind(&account.customer_id)
        .bind(account.credit_limit_cents)
        .bind(account.current_balance_cents)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        info!(account_id = %account.id, limit = account.credit_limit_cents, "credit account opened");
        Ok(account)
    }

    /// Gets an account by id.
    pub async fn get_account(&self, account_id: &str) -> EngineResult<CreditAccount> {
        sqlx::query_as::<_, CreditAccount>(&format!("{SELECT_ACCOUNT} WHERE id = ?1"))
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::not_found("CreditAccount", account_id))
    }

    /// Current balance for an account.
    pub async fn balance(&self, account_id: &str) -> EngineResult<Money> {
        Ok(self.get_account(account_id).await?.balance())
    }

    /// Deactivates an account.
    ///
    /// Refused while any balance is outstanding (in either direction) or a
    /// hold is pending; an account must wind down to zero first.
    pub async fn deactivate_account(&self, account_id: &str) -> EngineResult<()> {
        let _guard = self.account_lock(account_id).await?;
        let account = self.get_account(account_id).await?;

        if account.current_balance_cents != 0 {
            return Err(EngineError::BalanceOutstanding {
                account_id: account_id.to_string(),
                balance_cents: account.current_balance_cents,
            });
        }
        if self.pending_cents(account_id) != 0 {
            return Err(EngineError::invalid_state(
                "CreditAccount",
                account_id,
                "holding pending reservations",
            ));
        }

        sqlx::query("UPDATE credit_accounts SET is_active = 0, updated_at = ?2 WHERE id = ?1")
            .bind(account_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        info!(account_id, "credit account deactivated");
        Ok(())
    }

    /// Records a customer paying their account down.
    ///
    /// Appends a negative-delta ledger entry and moves the balance in the
    /// same transaction, keeping the reconciliation invariant intact.
    pub async fn apply_account_payment(
        &self,
        account_id: &str,
        amount: Money,
    ) -> EngineResult<CreditTransaction> {
        validate_amount_cents(amount.cents()).map_err(CoreError::from)?;

        let _guard = self.account_lock(account_id).await?;
        let account = self.get_account(account_id).await?;

        let txn = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            delta_cents: -amount.cents(),
            cause_sale_id: None,
            cause_payment_line_id: None,
            reservation_id: None,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        self.insert_txn_in_tx(&mut *tx, &txn).await?;
        sqlx::query(
            r#"
            UPDATE credit_accounts
            SET current_balance_cents = current_balance_cents + ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(account_id)
        .bind(txn.delta_cents)
        .bind(txn.created_at)
        .execute(&mut *tx)
        .await?;
        EventOutbox::enqueue_in_tx(&mut *tx, EVENT_CREDIT_TXN, account_id, &txn).await?;
        tx.commit().await?;

        info!(account_id, amount = amount.cents(), "account payment applied");
        Ok(txn)
    }

    /// Ledger entries for an account, oldest first. Feeds customer
    /// statements.
    pub async fn transactions(&self, account_id: &str) -> EngineResult<Vec<CreditTransaction>> {
        let txns = sqlx::query_as::<_, CreditTransaction>(&format!(
            "{SELECT_TXN} WHERE account_id = ?1 ORDER BY created_at, id"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(txns)
    }

    /// Gets a single ledger entry by id.
    pub async fn get_transaction(&self, id: &str) -> EngineResult<Option<CreditTransaction>> {
        let txn = sqlx::query_as::<_, CreditTransaction>(&format!("{SELECT_TXN} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(txn)
    }

    /// Appends a reversing entry for a committed transaction inside the
    /// caller's transaction (sale void path). The ledger stays append-only;
    /// the original row is untouched.
    pub(crate) async fn reverse_in_tx(
        &self,
        conn: &mut SqliteConnection,
        original: &CreditTransaction,
        cause_sale_id: &str,
    ) -> EngineResult<CreditTransaction> {
        let txn = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            account_id: original.account_id.clone(),
            delta_cents: -original.delta_cents,
            cause_sale_id: Some(cause_sale_id.to_string()),
            cause_payment_line_id: original.cause_payment_line_id.clone(),
            reservation_id: None,
            created_at: Utc::now(),
        };

        self.insert_txn_in_tx(conn, &txn).await?;
        sqlx::query(
            r#"
            UPDATE credit_accounts
            SET current_balance_cents = current_balance_cents + ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(&txn.account_id)
        .bind(txn.delta_cents)
        .bind(txn.created_at)
        .execute(&mut *conn)
        .await?;
        EventOutbox::enqueue_in_tx(conn, EVENT_CREDIT_TXN, &txn.account_id, &txn).await?;

        debug!(account_id = %txn.account_id, delta = txn.delta_cents, "credit reversed");
        Ok(txn)
    }

    /// Checks the reconciliation invariant: the cached balance equals the
    /// running sum of the account's ledger deltas.
    pub async fn reconcile(&self, account_id: &str) -> EngineResult<bool> {
        let account = self.get_account(account_id).await?;

        let ledger_sum: Option<i64> =
            sqlx::query_scalar("SELECT SUM(delta_cents) FROM credit_transactions WHERE account_id = ?1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(account.current_balance_cents == ledger_sum.unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Reservations
    // -------------------------------------------------------------------------

    /// Places a hold on an account's available credit.
    ///
    /// Fails with `InsufficientCredit` when the balance plus pending holds
    /// plus `amount` would exceed the limit, `AccountInactive`, or
    /// `NotFound`. The hold expires after the configured TTL unless
    /// committed or released.
    pub async fn reserve(
        &self,
        account_id: &str,
        amount: Money,
        sale_id: Option<&str>,
    ) -> EngineResult<ReservationToken> {
        validate_amount_cents(amount.cents()).map_err(CoreError::from)?;

        let _guard = self.account_lock(account_id).await?;
        let account = self.get_account(account_id).await?;

        if !account.is_active {
            return Err(EngineError::AccountInactive {
                account_id: account_id.to_string(),
            });
        }

        let pending = self.pending_cents(account_id);
        let available = account.credit_limit_cents - account.current_balance_cents - pending;
        if amount.cents() > available {
            return Err(EngineError::InsufficientCredit {
                account_id: account_id.to_string(),
                requested_cents: amount.cents(),
                available_cents: available.max(0),
            });
        }

        let token = ReservationToken::new();
        let ttl = chrono::Duration::from_std(self.reservation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let hold = CreditHold {
            account_id: account_id.to_string(),
            amount_cents: amount.cents(),
            sale_id: sale_id.map(str::to_string),
            expires_at: Utc::now() + ttl,
        };

        self.holds().insert(token, hold);

        debug!(account_id, amount = amount.cents(), %token, "credit reserved");
        Ok(token)
    }

    /// Releases an uncommitted hold. Idempotent: releasing an unknown or
    /// already-released token is a no-op.
    pub fn release(&self, token: ReservationToken) {
        if self.holds().remove(&token).is_some() {
            debug!(%token, "reservation released");
        }
    }

    /// Releases every hold tagged with the given sale. Returns how many
    /// were dropped.
    pub fn release_for_sale(&self, sale_id: &str) -> usize {
        let mut holds = self.holds();
        let before = holds.len();
        holds.retain(|_, h| h.sale_id.as_deref() != Some(sale_id));
        let dropped = before - holds.len();
        if dropped > 0 {
            debug!(sale_id, dropped, "sale reservations released");
        }
        dropped
    }

    /// Converts a hold into a durable ledger entry, standalone.
    ///
    /// Idempotent under retry: committing the same token twice produces
    /// exactly one `CreditTransaction`.
    pub async fn commit_reservation(
        &self,
        token: ReservationToken,
        cause_sale_id: &str,
        cause_payment_line_id: &str,
    ) -> EngineResult<CreditTransaction> {
        let mut tx = self.pool.begin().await?;
        let txn = self
            .commit_in_tx(&mut *tx, token, cause_sale_id, cause_payment_line_id)
            .await?;
        tx.commit().await?;

        self.finalize(&[token]);
        Ok(txn)
    }

    /// Converts a hold into a ledger entry inside the caller's transaction.
    ///
    /// The caller must invoke [`LedgerStore::finalize`] after its
    /// transaction commits; until then the hold keeps counting against
    /// available credit, which errs on the safe side if the transaction
    /// rolls back.
    pub(crate) async fn commit_in_tx(
        &self,
        conn: &mut SqliteConnection,
        token: ReservationToken,
        cause_sale_id: &str,
        cause_payment_line_id: &str,
    ) -> EngineResult<CreditTransaction> {
        // Retried commit: the token is already on a ledger row.
        if let Some(existing) =
            sqlx::query_as::<_, CreditTransaction>(&format!("{SELECT_TXN} WHERE reservation_id = ?1"))
                .bind(token.to_string())
                .fetch_optional(&mut *conn)
                .await?
        {
            debug!(%token, txn_id = %existing.id, "reservation already committed");
            return Ok(existing);
        }

        let hold = self
            .holds()
            .get(&token)
            .cloned()
            .ok_or_else(|| EngineError::ReservationNotFound {
                token: token.to_string(),
            })?;

        if hold.expires_at <= Utc::now() {
            return Err(EngineError::ReservationNotFound {
                token: token.to_string(),
            });
        }

        let txn = CreditTransaction {
            id: Uuid::new_v4().to_string(),
            account_id: hold.account_id.clone(),
            delta_cents: hold.amount_cents,
            cause_sale_id: Some(cause_sale_id.to_string()),
            cause_payment_line_id: Some(cause_payment_line_id.to_string()),
            reservation_id: Some(token.to_string()),
            created_at: Utc::now(),
        };

        self.insert_txn_in_tx(conn, &txn).await?;

        // The WHERE clause re-checks the limit at write time; the invariant
        // holds even against writers that bypass the in-process locks.
        let result = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET current_balance_cents = current_balance_cents + ?2, updated_at = ?3
            WHERE id = ?1
              AND is_active = 1
              AND current_balance_cents + ?2 <= credit_limit_cents
            "#,
        )
        .bind(&hold.account_id)
        .bind(txn.delta_cents)
        .bind(txn.created_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                detail: format!(
                    "balance update refused for account {} (limit or active flag)",
                    hold.account_id
                ),
            });
        }

        EventOutbox::enqueue_in_tx(conn, EVENT_CREDIT_TXN, &hold.account_id, &txn).await?;

        debug!(account_id = %hold.account_id, delta = txn.delta_cents, %token, "credit committed");
        Ok(txn)
    }

    /// Drops holds whose ledger entries are durably committed.
    pub(crate) fn finalize(&self, tokens: &[ReservationToken]) {
        let mut holds = self.holds();
        for token in tokens {
            holds.remove(token);
        }
    }

    /// Reclaims expired holds. Invoked by the surrounding application on
    /// whatever cadence it chooses; the engine has no internal timer.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut holds = self.holds();
        let before = holds.len();
        holds.retain(|_, h| h.expires_at > now);
        let swept = before - holds.len();
        if swept > 0 {
            info!(swept, "expired credit reservations reclaimed");
        }
        swept
    }

    /// Cents currently held for an account by unexpired reservations.
    pub fn pending_cents(&self, account_id: &str) -> i64 {
        let now = Utc::now();
        self.holds()
            .values()
            .filter(|h| h.account_id == account_id && h.expires_at > now)
            .map(|h| h.amount_cents)
            .sum()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn holds(&self) -> std::sync::MutexGuard<'_, HashMap<ReservationToken, CreditHold>> {
        self.state.holds.lock().expect("ledger hold table poisoned")
    }

    /// Acquires the per-account mutex, bounded by the configured timeout.
    async fn account_lock(&self, account_id: &str) -> EngineResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.state.locks.lock().expect("ledger lock table poisoned");
            Arc::clone(locks.entry(account_id.to_string()).or_default())
        };

        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| EngineError::Timeout {
                operation: "ledger.account_lock",
            })
    }

    async fn insert_txn_in_tx(
        &self,
        conn: &mut SqliteConnection,
        txn: &CreditTransaction,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_transactions (
                id, account_id, delta_cents, cause_sale_id,
                cause_payment_line_id, reservation_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&txn.id)
        .bind(&txn.account_id)
        .bind(txn.delta_cents)
        .bind(&txn.cause_sale_id)
        .bind(&txn.cause_payment_line_id)
        .bind(&txn.reservation_id)
        .bind(txn.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn ledger() -> (Database, LedgerStore) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = LedgerStore::new(db.pool().clone(), &EngineConfig::default());
        (db, store)
    }

    /// Account with limit 1000.00 and an existing balance of 800.00.
    async fn account_with_balance(store: &LedgerStore) -> String {
        let account = store
            .create_account("cust-1", Money::from_cents(100_000))
            .await
            .unwrap();
        let token = store
            .reserve(&account.id, Money::from_cents(80_000), None)
            .await
            .unwrap();
        store
            .commit_reservation(token, "sale-prior", "line-prior")
            .await
            .unwrap();
        account.id
    }

    #[tokio::test]
    async fn reserve_respects_credit_limit() {
        let (_db, store) = ledger().await;
        let account_id = account_with_balance(&store).await;

        // 300.00 would land at 1100.00, past the 1000.00 limit
        let err = store
            .reserve(&account_id, Money::from_cents(30_000), None)
            .await
            .unwrap_err();
        match err {
            EngineError::InsufficientCredit {
                requested_cents,
                available_cents,
                ..
            } => {
                assert_eq!(requested_cents, 30_000);
                assert_eq!(available_cents, 20_000);
            }
            other => panic!("expected InsufficientCredit, got {other:?}"),
        }

        // 150.00 fits; committing lands the balance at 950.00
        let token = store
            .reserve(&account_id, Money::from_cents(15_000), None)
            .await
            .unwrap();
        store
            .commit_reservation(token, "sale-1", "line-1")
            .await
            .unwrap();

        assert_eq!(store.balance(&account_id).await.unwrap().cents(), 95_000);
        assert!(store.reconcile(&account_id).await.unwrap());
    }

    #[tokio::test]
    async fn pending_holds_count_against_available() {
        let (_db, store) = ledger().await;
        let account = store
            .create_account("cust-2", Money::from_cents(1_000))
            .await
            .unwrap();

        let _held = store
            .reserve(&account.id, Money::from_cents(700), None)
            .await
            .unwrap();

        // Balance is still 0, but only 300 remains under the limit
        let err = store
            .reserve(&account.id, Money::from_cents(400), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientCredit { available_cents: 300, .. }));
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_token() {
        let (db, store) = ledger().await;
        let account = store
            .create_account("cust-3", Money::from_cents(10_000))
            .await
            .unwrap();

        let token = store
            .reserve(&account.id, Money::from_cents(2_500), None)
            .await
            .unwrap();

        let first = store
            .commit_reservation(token, "sale-1", "line-1")
            .await
            .unwrap();
        let second = store
            .commit_reservation(token, "sale-1", "line-1")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(store.balance(&account.id).await.unwrap().cents(), 2_500);
        assert!(store.reconcile(&account.id).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_held_credit() {
        let (_db, store) = ledger().await;
        let account = store
            .create_account("cust-4", Money::from_cents(500))
            .await
            .unwrap();

        let token = store
            .reserve(&account.id, Money::from_cents(500), None)
            .await
            .unwrap();
        assert!(store
            .reserve(&account.id, Money::from_cents(1), None)
            .await
            .is_err());

        store.release(token);
        store.release(token); // idempotent

        assert!(store
            .reserve(&account.id, Money::from_cents(500), None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_holds_stop_counting_and_sweep() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = EngineConfig::default().reservation_ttl(Duration::from_secs(0));
        let store = LedgerStore::new(db.pool().clone(), &config);

        let account = store
            .create_account("cust-5", Money::from_cents(1_000))
            .await
            .unwrap();
        let token = store
            .reserve(&account.id, Money::from_cents(1_000), None)
            .await
            .unwrap();

        // TTL zero: the hold is born expired
        assert_eq!(store.pending_cents(&account.id), 0);

        let err = store
            .commit_reservation(token, "sale-x", "line-x")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ReservationNotFound { .. }));

        assert_eq!(store.sweep_expired(Utc::now()), 1);
        assert_eq!(store.sweep_expired(Utc::now()), 0);
    }

    #[tokio::test]
    async fn inactive_and_missing_accounts_are_rejected() {
        let (_db, store) = ledger().await;

        let err = store
            .reserve("no-such-account", Money::from_cents(100), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        let account = store
            .create_account("cust-6", Money::from_cents(1_000))
            .await
            .unwrap();
        store.deactivate_account(&account.id).await.unwrap();

        let err = store
            .reserve(&account.id, Money::from_cents(100), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccountInactive { .. }));
    }

    #[tokio::test]
    async fn deactivation_blocked_while_balance_outstanding() {
        let (_db, store) = ledger().await;
        let account = store
            .create_account("cust-7", Money::from_cents(10_000))
            .await
            .unwrap();

        let token = store
            .reserve(&account.id, Money::from_cents(4_000), None)
            .await
            .unwrap();
        store
            .commit_reservation(token, "sale-1", "line-1")
            .await
            .unwrap();

        let err = store.deactivate_account(&account.id).await.unwrap_err();
        assert!(matches!(err, EngineError::BalanceOutstanding { balance_cents: 4_000, .. }));

        // Pay the account down, then deactivation goes through
        store
            .apply_account_payment(&account.id, Money::from_cents(4_000))
            .await
            .unwrap();
        store.deactivate_account(&account.id).await.unwrap();
    }

    #[tokio::test]
    async fn account_payment_appends_negative_delta() {
        let (_db, store) = ledger().await;
        let account_id = account_with_balance(&store).await;

        let txn = store
            .apply_account_payment(&account_id, Money::from_cents(30_000))
            .await
            .unwrap();
        assert_eq!(txn.delta_cents, -30_000);

        assert_eq!(store.balance(&account_id).await.unwrap().cents(), 50_000);
        assert!(store.reconcile(&account_id).await.unwrap());

        let deltas: Vec<i64> = store
            .transactions(&account_id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.delta_cents)
            .collect();
        assert_eq!(deltas, vec![80_000, -30_000]);
    }

    #[tokio::test]
    async fn release_for_sale_drops_tagged_holds_only() {
        let (_db, store) = ledger().await;
        let account = store
            .create_account("cust-8", Money::from_cents(10_000))
            .await
            .unwrap();

        store
            .reserve(&account.id, Money::from_cents(1_000), Some("sale-a"))
            .await
            .unwrap();
        store
            .reserve(&account.id, Money::from_cents(2_000), Some("sale-a"))
            .await
            .unwrap();
        store
            .reserve(&account.id, Money::from_cents(3_000), Some("sale-b"))
            .await
            .unwrap();

        assert_eq!(store.release_for_sale("sale-a"), 2);
        assert_eq!(store.pending_cents(&account.id), 3_000);
    }

    /// No lost update: N tasks race the same account, and only the holds
    /// the limit can honor are granted.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_oversubscribe() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(
            DbConfig::new(dir.path().join("ledger.db")).max_connections(8),
        )
        .await
        .unwrap();
        let store = LedgerStore::new(db.pool().clone(), &EngineConfig::default());

        let account = store
            .create_account("cust-race", Money::from_cents(1_000))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let account_id = account.id.clone();
            handles.push(tokio::spawn(async move {
                store.reserve(&account_id, Money::from_cents(300), None).await
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            if let Ok(token) = handle.await.unwrap() {
                granted.push(token);
            }
        }

        // 3 × 300 fits under 1000; a fourth would not
        assert_eq!(granted.len(), 3);
        assert_eq!(store.pending_cents(&account.id), 900);

        for (i, token) in granted.into_iter().enumerate() {
            store
                .commit_reservation(token, "sale-race", &format!("line-{i}"))
                .await
                .unwrap();
        }

        assert_eq!(store.balance(&account.id).await.unwrap().cents(), 900);
        assert!(store.reconcile(&account.id).await.unwrap());
    }
}
