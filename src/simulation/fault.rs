//! Fault injection for settlement testing.
//!
//! Wraps any [`LedgerStore`] and fails balance mutations on cue, so
//! tests can drive the coordinator into its compensation and
//! unrecoverable paths deterministically.

use crate::core::account::AccountId;
use crate::core::funding::{FundingSource, SourceId};
use crate::core::loan::{LoanRequest, LoanStatus};
use crate::settlement::record::{IdempotencyKey, SettlementRecord};
use crate::settlement::store::{
    BalanceField, LedgerStore, Precondition, SourceFilter, StoreError,
};
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

/// How the injected fault behaves once triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail exactly one mutation, then recover.
    Once,
    /// Fail every mutation from the trigger point on.
    Persistent,
}

#[derive(Debug)]
struct FaultState {
    /// Balance/wallet mutations to allow before the fault fires.
    countdown: usize,
    mode: FaultMode,
    tripped: bool,
}

/// A [`LedgerStore`] decorator that injects `Unavailable` errors into
/// balance and wallet mutations after a configured number of successful
/// ones. Reads, status transitions, and record operations pass through
/// untouched.
pub struct FaultyStore<S> {
    inner: S,
    state: Mutex<FaultState>,
}

impl<S> FaultyStore<S> {
    /// Let `countdown` balance/wallet mutations succeed, then fail
    /// according to `mode`.
    pub fn new(inner: S, countdown: usize, mode: FaultMode) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState {
                countdown,
                mode,
                tripped: false,
            }),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.tripped && state.mode == FaultMode::Once {
            return Ok(());
        }
        if state.countdown == 0 {
            state.tripped = true;
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        state.countdown -= 1;
        Ok(())
    }
}

impl<S: LedgerStore> LedgerStore for FaultyStore<S> {
    fn read_loan_request(&self, id: Uuid) -> Result<LoanRequest, StoreError> {
        self.inner.read_loan_request(id)
    }

    fn read_funding_sources(
        &self,
        filter: &SourceFilter,
    ) -> Result<Vec<FundingSource>, StoreError> {
        self.inner.read_funding_sources(filter)
    }

    fn conditional_update_balance(
        &self,
        source: &SourceId,
        field: BalanceField,
        delta: Decimal,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError> {
        self.check_fault()?;
        self.inner
            .conditional_update_balance(source, field, delta, precondition)
    }

    fn conditional_update_wallet(
        &self,
        owner: &AccountId,
        delta: Decimal,
        min_balance: Option<Decimal>,
    ) -> Result<(), StoreError> {
        self.check_fault()?;
        self.inner.conditional_update_wallet(owner, delta, min_balance)
    }

    fn conditional_transition_loan_status(
        &self,
        loan: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<(), StoreError> {
        self.inner.conditional_transition_loan_status(loan, from, to)
    }

    fn append_settlement_record(&self, record: &SettlementRecord) -> Result<Uuid, StoreError> {
        self.inner.append_settlement_record(record)
    }

    fn update_settlement_record(&self, record: &SettlementRecord) -> Result<(), StoreError> {
        self.inner.update_settlement_record(record)
    }

    fn read_settlement_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementRecord>, StoreError> {
        self.inner.read_settlement_record(key)
    }
}
