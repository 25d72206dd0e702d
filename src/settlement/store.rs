use crate::core::account::AccountId;
use crate::core::funding::{FundingSource, SourceId};
use crate::core::loan::{LoanRequest, LoanStatus};
use crate::settlement::record::{IdempotencyKey, SettlementRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which balance column of a funding source an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceField {
    Available,
    Reserved,
}

impl std::fmt::Display for BalanceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceField::Available => write!(f, "available"),
            BalanceField::Reserved => write!(f, "reserved"),
        }
    }
}

/// Precondition attached to a balance update: the named field must hold
/// at least `at_least` for the update to apply. This is the only way
/// any component mutates shared balances — never read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub field: BalanceField,
    pub at_least: Decimal,
}

impl Precondition {
    pub fn at_least(field: BalanceField, amount: Decimal) -> Self {
        Self {
            field,
            at_least: amount,
        }
    }
}

/// Candidate pre-filter for `read_funding_sources`.
///
/// `exclude_owner` keeps a borrower from funding their own loan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFilter {
    pub min_available: Option<Decimal>,
    pub exclude_owner: Option<AccountId>,
}

/// Errors surfaced by a ledger store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("loan request {0} not found")]
    LoanNotFound(Uuid),

    #[error("funding source {0} not found")]
    SourceNotFound(SourceId),

    #[error("settlement record {0} not found")]
    RecordNotFound(Uuid),

    #[error("idempotency key {0} already recorded")]
    DuplicateKey(IdempotencyKey),

    /// The conditional update's precondition did not hold. This is the
    /// optimistic-concurrency signal, not an infrastructure fault.
    #[error("precondition failed: {detail}")]
    PreconditionFailed { detail: String },

    /// Transient infrastructure failure (network, backend outage).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error is the optimistic-concurrency signal rather
    /// than an infrastructure fault.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed { .. })
    }
}

/// The data-access interface the settlement core consumes.
///
/// Implemented by the backing ledger (a remote relational store in
/// production, [`InMemoryLedger`](crate::settlement::memory::InMemoryLedger)
/// in tests and simulations). Every mutation is conditional: an update
/// applies only if its precondition holds at the store, which pushes
/// all cross-caller coordination into the shared store instead of
/// client-side locks.
///
/// Implementations must be safe to call from multiple threads; every
/// method is a potential network round trip and may take arbitrarily
/// long.
pub trait LedgerStore: Send + Sync {
    /// Read a loan request by id.
    fn read_loan_request(&self, id: Uuid) -> Result<LoanRequest, StoreError>;

    /// Read funding sources matching the filter, ordered by id for
    /// deterministic candidate lists.
    fn read_funding_sources(&self, filter: &SourceFilter) -> Result<Vec<FundingSource>, StoreError>;

    /// Apply `delta` to one balance field of a source, provided the
    /// precondition holds and the result stays non-negative.
    fn conditional_update_balance(
        &self,
        source: &SourceId,
        field: BalanceField,
        delta: Decimal,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError>;

    /// Apply `delta` to an account's wallet balance, provided the wallet
    /// holds at least `min_balance` (when given) and the result stays
    /// non-negative.
    fn conditional_update_wallet(
        &self,
        owner: &AccountId,
        delta: Decimal,
        min_balance: Option<Decimal>,
    ) -> Result<(), StoreError>;

    /// Transition a loan's status, provided it currently equals `from`
    /// and the transition is legal. Acts as the per-loan
    /// mutual-exclusion gate when `from` is `Pending` and `to` is
    /// `Matching`.
    fn conditional_transition_loan_status(
        &self,
        loan: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<(), StoreError>;

    /// Append a new settlement record. Fails on a duplicate
    /// idempotency key.
    fn append_settlement_record(&self, record: &SettlementRecord) -> Result<Uuid, StoreError>;

    /// Overwrite an existing settlement record (status changes).
    fn update_settlement_record(&self, record: &SettlementRecord) -> Result<(), StoreError>;

    /// Look up a settlement record by idempotency key.
    fn read_settlement_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementRecord>, StoreError>;
}
