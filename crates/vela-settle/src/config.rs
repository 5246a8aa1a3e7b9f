//! # Engine Configuration
//!
//! Tuning knobs for the settlement engine.
//!
//! ## Configuration Sources
//! ```text
//! 1. Environment variables (highest priority)
//!    VELA_RESERVATION_TTL_SECS=300
//!    VELA_LEDGER_LOCK_TIMEOUT_MS=5000
//!    VELA_ROUNDING_TOLERANCE_CENTS=0
//!
//! 2. Defaults (lowest priority)
//! ```
//!
//! Invalid values are logged and ignored rather than failing startup.

use std::time::Duration;
use tracing::warn;

// =============================================================================
// Engine Config
// =============================================================================

/// Settlement engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an uncommitted credit reservation holds its amount before
    /// the sweep reclaims it. Bounds leakage from crashed terminals.
    pub reservation_ttl: Duration,

    /// Upper bound on waiting for a per-account ledger lock. A stuck caller
    /// surfaces `Timeout` instead of freezing credit processing for others.
    pub ledger_lock_timeout: Duration,

    /// Allowed difference, in cents, between the tendered sum and the sale
    /// total for a sale to settle. Zero means exact match.
    pub rounding_tolerance_cents: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            reservation_ttl: Duration::from_secs(300),
            ledger_lock_timeout: Duration::from_secs(5),
            rounding_tolerance_cents: 0,
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from defaults plus `VELA_*` environment
    /// variable overrides.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();

        if let Some(secs) = read_env_u64("VELA_RESERVATION_TTL_SECS") {
            config.reservation_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = read_env_u64("VELA_LEDGER_LOCK_TIMEOUT_MS") {
            config.ledger_lock_timeout = Duration::from_millis(ms);
        }
        if let Some(cents) = read_env_u64("VELA_ROUNDING_TOLERANCE_CENTS") {
            config.rounding_tolerance_cents = cents as i64;
        }

        config
    }

    /// Sets the reservation TTL.
    pub fn reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Sets the ledger lock timeout.
    pub fn ledger_lock_timeout(mut self, timeout: Duration) -> Self {
        self.ledger_lock_timeout = timeout;
        self
    }

    /// Sets the rounding tolerance in cents.
    pub fn rounding_tolerance_cents(mut self, cents: i64) -> Self {
        self.rounding_tolerance_cents = cents;
        self
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reservation_ttl, Duration::from_secs(300));
        assert_eq!(config.ledger_lock_timeout, Duration::from_secs(5));
        assert_eq!(config.rounding_tolerance_cents, 0);
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::default()
            .reservation_ttl(Duration::from_secs(60))
            .ledger_lock_timeout(Duration::from_millis(250))
            .rounding_tolerance_cents(1);

        assert_eq!(config.reservation_ttl, Duration::from_secs(60));
        assert_eq!(config.ledger_lock_timeout, Duration::from_millis(250));
        assert_eq!(config.rounding_tolerance_cents, 1);
    }
}
