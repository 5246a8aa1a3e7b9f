//! # vela-settle: The Sale Settlement Engine
//!
//! Turns a shopping cart into a finalized, auditable sale when payment is
//! split across multiple tenders (cash, card, account credit, lay-bye
//! installments), with credit-limit enforcement, ledger updates, and
//! installment completion tracking.
//!
//! ## Component Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     vela-settle Data Flow                           │
//! │                                                                     │
//! │  settle_sale(SaleDraft)          record_laybye_installment(...)     │
//! │       │                                │                            │
//! │       ▼                                ▼                            │
//! │  ┌───────────────────────┐     ┌──────────────────┐                 │
//! │  │ SettlementEngine      │◄────┤ LaybyeScheduler  │                 │
//! │  │ (settlement.rs)       │     │ (laybye.rs)      │                 │
//! │  └──────────┬────────────┘     └────────┬─────────┘                 │
//! │             │ validate each tender      │                           │
//! │             ▼                           │                           │
//! │  ┌───────────────────────┐              │                           │
//! │  │ TenderValidator       │              │                           │
//! │  │ (validator.rs)        │              │                           │
//! │  └──────────┬────────────┘              │                           │
//! │             │ reserve / commit credit   │                           │
//! │             ▼                           ▼                           │
//! │  ┌─────────────────────────────────────────────────┐                │
//! │  │ LedgerStore (ledger.rs)                         │                │
//! │  │ per-account locks · holds · append-only ledger  │                │
//! │  └──────────────────────┬──────────────────────────┘                │
//! │                         ▼                                           │
//! │  ┌─────────────────────────────────────────────────┐                │
//! │  │ SQLite (one transaction per commit)             │                │
//! │  │ sales · payment_lines · credit_* · outbox       │                │
//! │  └─────────────────────────────────────────────────┘                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`config`] - Engine tuning knobs (reservation TTL, lock timeout)
//! - [`error`] - Engine error types
//! - [`ledger`] - Ledger Store: accounts, reservations, credit transactions
//! - [`validator`] - Tender Validator
//! - [`settlement`] - Settlement Orchestrator
//! - [`laybye`] - Lay-bye Scheduler
//! - [`repository`] - Row-level repositories (sale, catalog, laybye, outbox)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vela_settle::{Database, DbConfig, EngineConfig, SettlementEngine};
//!
//! let db = Database::new(DbConfig::new("vela.db")).await?;
//! let engine = SettlementEngine::new(db, EngineConfig::default());
//!
//! let record = engine.settle_sale(draft).await?;
//! println!("sale {} settled, change {}", record.sale_id, record.change_due_cents);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod laybye;
pub mod ledger;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod settlement;
pub mod validator;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use laybye::LaybyeScheduler;
pub use ledger::{LedgerStore, ReservationToken};
pub use pool::{Database, DbConfig};
pub use settlement::SettlementEngine;
pub use validator::{SaleContext, TenderValidator};

// Repository re-exports for convenience
pub use repository::catalog::CatalogRepository;
pub use repository::outbox::{EventOutbox, OutboxEvent};
pub use repository::sale::SaleRepository;
