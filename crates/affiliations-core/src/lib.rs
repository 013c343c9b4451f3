//! Ledger kernel for the affiliations system: durable relationship storage,
//! pooled wallets, marriage/divorce contract state machines, and the kinship
//! graph used for tree layout.
//!
//! Storage is synchronous SQLite; the external personal-balance ledger is an
//! async capability so no local transaction is ever held across a network
//! round trip.

use thiserror::Error;

use records::{DivorceStatus, RelationKind, UserId};

pub mod coins;
pub mod kernel;
pub mod store;

pub use coins::{CoinError, CoinLedger, HttpCoinLedger, NullCoinLedger};
pub use kernel::{FamilyKernel, SplitPolicy, TreeOptions};
pub use store::{LedgerStore, StoreError};

/// Unix seconds. The kernel clocks every timestamp through this so tests can
/// inject their own time.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{kind} relation requires exactly two distinct members, got {got}")]
    InvalidArity { kind: RelationKind, got: usize },

    #[error("user {0} is already married in this guild")]
    DuplicateMarriage(UserId),

    #[error("relation {0} is not a family")]
    NotAFamily(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("user {0} may not act on this")]
    Unauthorized(UserId),

    #[error("contract {contract_id} is already finalized ({status})")]
    AlreadyFinalized {
        contract_id: String,
        status: DivorceStatus,
    },

    #[error("contract {0} has expired")]
    Expired(String),

    #[error("insufficient funds: need {needed}, pooled {pooled} + personal {personal}")]
    InsufficientFunds {
        needed: i64,
        pooled: i64,
        personal: i64,
    },

    #[error("external coin ledger did not apply the operation: {0}")]
    ExternalLedgerUnavailable(String),

    #[error("percent_for_a must be within 0..=100, got {0}")]
    InvalidPercent(i64),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("kin edge {parent_id} -> {child_id} would create a cycle")]
    KinshipCycle { parent_id: UserId, child_id: UserId },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether retrying the same operation can succeed once the external
    /// ledger recovers. Validation and state-machine errors are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalLedgerUnavailable(_))
    }
}

impl From<CoinError> for LedgerError {
    fn from(value: CoinError) -> Self {
        Self::ExternalLedgerUnavailable(value.to_string())
    }
}
