//! # funding-engine
//!
//! Open peer-to-peer loan funding and settlement engine.
//!
//! Given a loan request and a pool of candidate funding sources, this
//! engine computes a deterministic allocation and applies it atomically
//! against a shared ledger store, with compensation on partial failure
//! and idempotent replay.
//!
//! ## Architecture
//!
//! - **core** — Foundational types: accounts, funding sources, loan requests
//! - **matching** — Pure greedy allocation of loans across sources
//! - **settlement** — Ledger store interface, two-phase coordinator, records
//! - **simulation** — Random pool generation and fault injection

pub mod core;
pub mod matching;
pub mod settlement;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::account::AccountId;
    pub use crate::core::funding::{FundingSource, SourceId};
    pub use crate::core::loan::{LoanRequest, LoanStatus};
    pub use crate::matching::allocation::Allocation;
    pub use crate::matching::engine::{MatchError, MatchingEngine};
    pub use crate::matching::policy::MatchPolicy;
    pub use crate::settlement::coordinator::{SettlementCoordinator, SettlementError};
    pub use crate::settlement::memory::InMemoryLedger;
    pub use crate::settlement::record::{IdempotencyKey, SettlementRecord, SettlementStatus};
    pub use crate::settlement::store::LedgerStore;
}
