use crate::core::account::AccountId;
use crate::core::funding::{FundingSource, SourceId};
use crate::core::loan::{LoanRequest, LoanStatus};
use crate::settlement::record::{IdempotencyKey, SettlementRecord};
use crate::settlement::store::{
    BalanceField, LedgerStore, Precondition, SourceFilter, StoreError,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    loans: HashMap<Uuid, LoanRequest>,
    /// BTreeMap keeps candidate reads ordered by source id.
    sources: BTreeMap<SourceId, FundingSource>,
    /// Cash accounts credited by settlements (borrower side).
    wallets: HashMap<AccountId, Decimal>,
    records: HashMap<IdempotencyKey, SettlementRecord>,
}

/// Reference [`LedgerStore`] backed by process memory.
///
/// Serves tests, simulations, and the CLI, and doubles as a template
/// for real backends: every conditional primitive checks its
/// precondition and applies atomically under one lock, which is the
/// behavior a remote store must provide per row.
///
/// Conservation: a committed settlement moves money from funding
/// sources into the borrower's wallet, so the sum of all source totals
/// plus all wallet balances never changes — `total_funds` exposes that
/// sum for verification.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-update in another thread;
        // the data is still the last consistent snapshot.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Seeding / inspection (not part of the LedgerStore contract) ---

    /// Insert or replace a loan request.
    pub fn insert_loan(&self, loan: LoanRequest) {
        self.lock().loans.insert(loan.id(), loan);
    }

    /// Insert or replace a funding source.
    pub fn insert_source(&self, source: FundingSource) {
        self.lock().sources.insert(source.id().clone(), source);
    }

    /// Seed an account's wallet.
    pub fn credit_wallet(&self, owner: &AccountId, amount: Decimal) {
        *self
            .lock()
            .wallets
            .entry(owner.clone())
            .or_insert(Decimal::ZERO) += amount;
    }

    /// Current wallet balance of an account (zero if never touched).
    pub fn wallet_balance(&self, owner: &AccountId) -> Decimal {
        self.lock()
            .wallets
            .get(owner)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of a funding source.
    pub fn funding_source(&self, id: &SourceId) -> Option<FundingSource> {
        self.lock().sources.get(id).cloned()
    }

    /// Sum of every source's total plus every wallet balance.
    ///
    /// Settlement moves money around but never creates or destroys it,
    /// so this sum is invariant across any settle outcome.
    pub fn total_funds(&self) -> Decimal {
        let inner = self.lock();
        let source_total: Decimal = inner.sources.values().map(|s| s.total()).sum();
        let wallet_total: Decimal = inner.wallets.values().copied().sum();
        source_total + wallet_total
    }
}

impl LedgerStore for InMemoryLedger {
    fn read_loan_request(&self, id: Uuid) -> Result<LoanRequest, StoreError> {
        self.lock()
            .loans
            .get(&id)
            .cloned()
            .ok_or(StoreError::LoanNotFound(id))
    }

    fn read_funding_sources(
        &self,
        filter: &SourceFilter,
    ) -> Result<Vec<FundingSource>, StoreError> {
        let inner = self.lock();
        let sources = inner
            .sources
            .values()
            .filter(|s| {
                filter
                    .min_available
                    .map_or(true, |min| s.available() >= min)
            })
            .filter(|s| {
                filter
                    .exclude_owner
                    .as_ref()
                    .map_or(true, |owner| s.owner() != owner)
            })
            .cloned()
            .collect();
        Ok(sources)
    }

    fn conditional_update_balance(
        &self,
        source_id: &SourceId,
        field: BalanceField,
        delta: Decimal,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let source = inner
            .sources
            .get_mut(source_id)
            .ok_or_else(|| StoreError::SourceNotFound(source_id.clone()))?;

        let field_value = |s: &FundingSource, f: BalanceField| match f {
            BalanceField::Available => s.available(),
            BalanceField::Reserved => s.reserved(),
        };

        if let Some(cond) = precondition {
            let held = field_value(source, cond.field);
            if held < cond.at_least {
                return Err(StoreError::PreconditionFailed {
                    detail: format!(
                        "source {} {} balance {} below required {}",
                        source_id, cond.field, held, cond.at_least
                    ),
                });
            }
        }

        let updated = field_value(source, field) + delta;
        if updated < Decimal::ZERO {
            return Err(StoreError::PreconditionFailed {
                detail: format!(
                    "source {} {} balance would go negative ({})",
                    source_id, field, updated
                ),
            });
        }

        let (available, reserved) = match field {
            BalanceField::Available => (updated, source.reserved()),
            BalanceField::Reserved => (source.available(), updated),
        };
        *source = FundingSource::with_reserved(
            source.id().clone(),
            source.owner().clone(),
            available,
            reserved,
        );
        Ok(())
    }

    fn conditional_update_wallet(
        &self,
        owner: &AccountId,
        delta: Decimal,
        min_balance: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let balance = inner.wallets.entry(owner.clone()).or_insert(Decimal::ZERO);

        if let Some(min) = min_balance {
            if *balance < min {
                return Err(StoreError::PreconditionFailed {
                    detail: format!(
                        "wallet {} balance {} below required {}",
                        owner, balance, min
                    ),
                });
            }
        }
        if *balance + delta < Decimal::ZERO {
            return Err(StoreError::PreconditionFailed {
                detail: format!(
                    "wallet {} balance would go negative ({})",
                    owner,
                    *balance + delta
                ),
            });
        }
        *balance += delta;
        Ok(())
    }

    fn conditional_transition_loan_status(
        &self,
        loan_id: Uuid,
        from: LoanStatus,
        to: LoanStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let loan = inner
            .loans
            .get_mut(&loan_id)
            .ok_or(StoreError::LoanNotFound(loan_id))?;

        if !loan.transition(from, to) {
            return Err(StoreError::PreconditionFailed {
                detail: format!(
                    "loan {} is {}, cannot transition {} -> {}",
                    loan_id,
                    loan.status(),
                    from,
                    to
                ),
            });
        }
        Ok(())
    }

    fn append_settlement_record(&self, record: &SettlementRecord) -> Result<Uuid, StoreError> {
        let mut inner = self.lock();
        let key = record.idempotency_key().clone();
        if inner.records.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        inner.records.insert(key, record.clone());
        Ok(record.id())
    }

    fn update_settlement_record(&self, record: &SettlementRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let key = record.idempotency_key().clone();
        match inner.records.get_mut(&key) {
            Some(existing) if existing.id() == record.id() => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(StoreError::RecordNotFound(record.id())),
        }
    }

    fn read_settlement_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<SettlementRecord>, StoreError> {
        Ok(self.lock().records.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded_ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.insert_source(FundingSource::new(
            SourceId::new("A"),
            AccountId::new("USR-1"),
            dec!(1000),
        ));
        ledger
    }

    #[test]
    fn test_conditional_update_applies() {
        let ledger = seeded_ledger();
        ledger
            .conditional_update_balance(
                &SourceId::new("A"),
                BalanceField::Available,
                dec!(-400),
                Some(Precondition::at_least(BalanceField::Available, dec!(400))),
            )
            .unwrap();
        let source = ledger.funding_source(&SourceId::new("A")).unwrap();
        assert_eq!(source.available(), dec!(600));
    }

    #[test]
    fn test_precondition_blocks_update() {
        let ledger = seeded_ledger();
        let err = ledger
            .conditional_update_balance(
                &SourceId::new("A"),
                BalanceField::Available,
                dec!(-2000),
                Some(Precondition::at_least(BalanceField::Available, dec!(2000))),
            )
            .unwrap_err();
        assert!(err.is_precondition_failure());

        // Balance untouched.
        let source = ledger.funding_source(&SourceId::new("A")).unwrap();
        assert_eq!(source.available(), dec!(1000));
    }

    #[test]
    fn test_balance_never_goes_negative() {
        let ledger = seeded_ledger();
        let err = ledger
            .conditional_update_balance(
                &SourceId::new("A"),
                BalanceField::Reserved,
                dec!(-1),
                None,
            )
            .unwrap_err();
        assert!(err.is_precondition_failure());
    }

    #[test]
    fn test_status_gate_single_winner() {
        let ledger = InMemoryLedger::new();
        let loan = LoanRequest::new(AccountId::new("USR-B"), dec!(100));
        let id = loan.id();
        ledger.insert_loan(loan);

        ledger
            .conditional_transition_loan_status(id, LoanStatus::Pending, LoanStatus::Matching)
            .unwrap();
        // Second claimant loses the gate.
        let err = ledger
            .conditional_transition_loan_status(id, LoanStatus::Pending, LoanStatus::Matching)
            .unwrap_err();
        assert!(err.is_precondition_failure());
    }

    #[test]
    fn test_source_filter() {
        let ledger = InMemoryLedger::new();
        ledger.insert_source(FundingSource::new(
            SourceId::new("A"),
            AccountId::new("USR-1"),
            dec!(500),
        ));
        ledger.insert_source(FundingSource::new(
            SourceId::new("B"),
            AccountId::new("USR-2"),
            dec!(50),
        ));

        let filter = SourceFilter {
            min_available: Some(dec!(100)),
            exclude_owner: None,
        };
        let sources = ledger.read_funding_sources(&filter).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id().as_str(), "A");

        let filter = SourceFilter {
            min_available: None,
            exclude_owner: Some(AccountId::new("USR-1")),
        };
        let sources = ledger.read_funding_sources(&filter).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id().as_str(), "B");
    }

    #[test]
    fn test_duplicate_idempotency_key_rejected() {
        use crate::matching::allocation::{Allocation, AllocationEntry};
        let ledger = seeded_ledger();
        let allocation = Allocation::new(
            Uuid::new_v4(),
            vec![AllocationEntry::new(SourceId::new("A"), dec!(100))],
        );
        let rec = SettlementRecord::begin(IdempotencyKey::new("k1"), allocation.clone());
        ledger.append_settlement_record(&rec).unwrap();

        let dup = SettlementRecord::begin(IdempotencyKey::new("k1"), allocation);
        assert!(matches!(
            ledger.append_settlement_record(&dup),
            Err(StoreError::DuplicateKey(_))
        ));
    }
}
