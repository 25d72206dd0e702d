use crate::core::account::AccountId;
use crate::core::funding::SourceId;
use crate::core::loan::LoanStatus;
use crate::matching::allocation::Allocation;
use crate::settlement::record::{IdempotencyKey, SettlementRecord};
use crate::settlement::store::{BalanceField, LedgerStore, Precondition, StoreError};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Typed failures of a settlement attempt.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Malformed input (empty allocation, total mismatch). A caller
    /// bug, never retried.
    #[error("invalid settlement request: {reason}")]
    InvalidRequest { reason: String },

    /// A reservation failed because the named source no longer holds
    /// the allocated amount. All prior reservations were released.
    #[error("insufficient funds in source {source_id} at step {step}: needed {needed}")]
    InsufficientFunds {
        source_id: SourceId,
        needed: Decimal,
        step: usize,
    },

    /// Another coordinator holds (or held) the loan's matching gate.
    /// Safe to retry after re-reading and re-matching.
    #[error("loan {loan_request_id} is claimed by another coordinator")]
    ConcurrentModification { loan_request_id: Uuid },

    /// A commit-phase step failed and every applied change was
    /// reversed. The loan is back in `pending` and can be re-matched;
    /// the record carries the full attempt snapshot.
    #[error("settlement compensated after failure at {failed_step}")]
    PartialFailureCompensated {
        record: Box<SettlementRecord>,
        failed_step: String,
    },

    /// Compensation itself failed. Balances may be inconsistent and
    /// require manual reconciliation; automated retries must halt.
    #[error(
        "unrecoverable settlement failure for loan {loan_request_id} at {failed_step}: {cause}"
    )]
    PartialFailureUnrecoverable {
        loan_request_id: Uuid,
        failed_step: String,
        cause: String,
    },

    /// Infrastructure failure before any balance was touched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a single reserve pair (debit available, credit reserved).
enum ReserveError {
    /// The reservation failed and the source is untouched.
    Store(StoreError),
    /// The debit applied but both the credit and its undo failed; the
    /// amount sits outside both balances until reconciled.
    UndoStuck { cause: StoreError },
}

/// A balance change this settlement has applied, remembered so it can
/// be reversed in reverse order if a later step fails.
#[derive(Debug, Clone)]
enum Applied {
    /// Moved `amount` from available to reserved on `source`.
    Reserved { source: SourceId, amount: Decimal },
    /// Permanently debited `amount` out of `source`'s reserved balance.
    Debited { source: SourceId, amount: Decimal },
    /// Credited `amount` into the borrower's wallet.
    Credited { owner: AccountId, amount: Decimal },
}

/// Applies an allocation atomically against the ledger store, or
/// leaves the system in its prior state.
///
/// The coordinator holds no locks. All coordination runs through the
/// store's conditional primitives: only the coordinator that wins the
/// loan's `pending -> matching` transition may proceed, and every
/// balance mutation carries a precondition. The two-phase protocol
/// (reserve, then commit) with compensation on failure substitutes for
/// the cross-row transaction the backing store does not offer.
///
/// # Examples
///
/// ```
/// use funding_engine::core::account::AccountId;
/// use funding_engine::core::funding::{FundingSource, SourceId};
/// use funding_engine::core::loan::LoanRequest;
/// use funding_engine::matching::engine::MatchingEngine;
/// use funding_engine::matching::policy::MatchPolicy;
/// use funding_engine::settlement::coordinator::SettlementCoordinator;
/// use funding_engine::settlement::memory::InMemoryLedger;
/// use funding_engine::settlement::record::IdempotencyKey;
/// use rust_decimal_macros::dec;
///
/// let ledger = InMemoryLedger::new();
/// let loan = LoanRequest::new(AccountId::new("USR-B"), dec!(300));
/// let sources = vec![
///     FundingSource::new(SourceId::new("A"), AccountId::new("USR-1"), dec!(200)),
///     FundingSource::new(SourceId::new("B"), AccountId::new("USR-2"), dec!(150)),
/// ];
/// for s in &sources {
///     ledger.insert_source(s.clone());
/// }
/// ledger.insert_loan(loan.clone());
///
/// let allocation =
///     MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default()).unwrap();
/// let coordinator = SettlementCoordinator::new(&ledger);
/// let record = coordinator
///     .settle(&allocation, &IdempotencyKey::new("settle-1"))
///     .unwrap();
/// assert_eq!(ledger.wallet_balance(&AccountId::new("USR-B")), dec!(300));
/// # let _ = record;
/// ```
pub struct SettlementCoordinator<'a, S: LedgerStore> {
    store: &'a S,
}

impl<'a, S: LedgerStore> SettlementCoordinator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Apply `allocation` under `key`.
    ///
    /// Replaying a key whose record is already resolved returns the
    /// stored record unchanged — no balance is touched twice. A key
    /// whose record is still pending belongs to an in-flight (or
    /// crashed) attempt and yields `ConcurrentModification`.
    pub fn settle(
        &self,
        allocation: &Allocation,
        key: &IdempotencyKey,
    ) -> Result<SettlementRecord, SettlementError> {
        if let Some(existing) = self.store.read_settlement_record(key)? {
            if existing.is_resolved() {
                debug!(
                    "settle replay for key {}: returning stored {} record",
                    key,
                    existing.status()
                );
                return Ok(existing);
            }
            return Err(SettlementError::ConcurrentModification {
                loan_request_id: existing.loan_request_id(),
            });
        }

        if allocation.is_empty() {
            return Err(SettlementError::InvalidRequest {
                reason: "allocation has no entries".into(),
            });
        }

        let loan_id = allocation.loan_request_id();
        let loan = self.store.read_loan_request(loan_id)?;
        if allocation.total_allocated() != loan.requested_amount() {
            return Err(SettlementError::InvalidRequest {
                reason: format!(
                    "allocation total {} does not cover requested amount {}",
                    allocation.total_allocated(),
                    loan.requested_amount()
                ),
            });
        }

        // Mutual-exclusion gate: one coordinator per loan.
        match self.store.conditional_transition_loan_status(
            loan_id,
            LoanStatus::Pending,
            LoanStatus::Matching,
        ) {
            Ok(()) => {}
            Err(e) if e.is_precondition_failure() => {
                return Err(SettlementError::ConcurrentModification {
                    loan_request_id: loan_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut record = SettlementRecord::begin(key.clone(), allocation.clone());
        if let Err(e) = self.store.append_settlement_record(&record) {
            // A concurrent attempt beat us to the key after our lookup.
            self.revert_gate(loan_id);
            return match e {
                StoreError::DuplicateKey(_) => Err(SettlementError::ConcurrentModification {
                    loan_request_id: loan_id,
                }),
                other => Err(other.into()),
            };
        }

        debug!(
            "settling loan {} across {} sources (key {})",
            loan_id,
            allocation.len(),
            key
        );

        let mut applied: Vec<Applied> = Vec::with_capacity(allocation.len() + 1);

        // Phase 1: reserve each slice in allocation order.
        for (step, entry) in allocation.entries().iter().enumerate() {
            match self.reserve(&entry.source_id, entry.amount) {
                Ok(()) => applied.push(Applied::Reserved {
                    source: entry.source_id.clone(),
                    amount: entry.amount,
                }),
                Err(ReserveError::Store(e)) if e.is_precondition_failure() => {
                    self.rollback(loan_id, &mut record, &applied, "reserve")?;
                    record.mark_failed();
                    self.persist_record(&record);
                    return Err(SettlementError::InsufficientFunds {
                        source_id: entry.source_id.clone(),
                        needed: entry.amount,
                        step,
                    });
                }
                Err(ReserveError::Store(e)) => {
                    self.rollback(loan_id, &mut record, &applied, "reserve")?;
                    record.mark_failed();
                    self.persist_record(&record);
                    return Err(e.into());
                }
                Err(ReserveError::UndoStuck { cause }) => {
                    error!(
                        "reservation on {} stranded {} outside both balances: {}",
                        entry.source_id, entry.amount, cause
                    );
                    record.mark_failed();
                    self.persist_record(&record);
                    return Err(SettlementError::PartialFailureUnrecoverable {
                        loan_request_id: loan_id,
                        failed_step: format!(
                            "undo of reservation debit on {}",
                            entry.source_id
                        ),
                        cause: cause.to_string(),
                    });
                }
            }
        }

        // Phase 2: debit every reserved slice, then credit the borrower.
        for (idx, entry) in allocation.entries().iter().enumerate() {
            match self.store.conditional_update_balance(
                &entry.source_id,
                BalanceField::Reserved,
                -entry.amount,
                Some(Precondition::at_least(BalanceField::Reserved, entry.amount)),
            ) {
                Ok(()) => {
                    applied[idx] = Applied::Debited {
                        source: entry.source_id.clone(),
                        amount: entry.amount,
                    };
                }
                Err(e) => {
                    return self.compensate(loan_id, record, applied, "debit", e);
                }
            }
        }

        let total = allocation.total_allocated();
        if let Err(e) = self
            .store
            .conditional_update_wallet(loan.borrower(), total, None)
        {
            return self.compensate(loan_id, record, applied, "borrower credit", e);
        }
        applied.push(Applied::Credited {
            owner: loan.borrower().clone(),
            amount: total,
        });

        if let Err(e) = self.store.conditional_transition_loan_status(
            loan_id,
            LoanStatus::Matching,
            LoanStatus::Funded,
        ) {
            return self.compensate(loan_id, record, applied, "mark funded", e);
        }

        record.mark_committed();
        self.persist_record(&record);
        info!(
            "settled loan {}: {} across {} sources (key {})",
            loan_id,
            total,
            allocation.len(),
            key
        );
        Ok(record)
    }

    /// Cancel a pending loan.
    ///
    /// A loan in `matching` has a settlement in flight and cannot be
    /// cancelled out from under its reservations; the conditional
    /// transition fails and surfaces as `ConcurrentModification`.
    pub fn cancel_loan(&self, loan_id: Uuid) -> Result<(), SettlementError> {
        match self.store.conditional_transition_loan_status(
            loan_id,
            LoanStatus::Pending,
            LoanStatus::Cancelled,
        ) {
            Ok(()) => {
                info!("cancelled loan {}", loan_id);
                Ok(())
            }
            Err(e) if e.is_precondition_failure() => {
                Err(SettlementError::ConcurrentModification {
                    loan_request_id: loan_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move `amount` from available to reserved on one source.
    ///
    /// The debit carries the precondition; the matching credit cannot
    /// hit a precondition, and if it fails for infrastructure reasons
    /// the debit is undone so the pair stays all-or-nothing. If the
    /// undo itself fails, the amount is stranded outside both balances
    /// and the failure must escalate, never look retryable.
    fn reserve(&self, source: &SourceId, amount: Decimal) -> Result<(), ReserveError> {
        self.store
            .conditional_update_balance(
                source,
                BalanceField::Available,
                -amount,
                Some(Precondition::at_least(BalanceField::Available, amount)),
            )
            .map_err(ReserveError::Store)?;
        if let Err(e) = self.store.conditional_update_balance(
            source,
            BalanceField::Reserved,
            amount,
            None,
        ) {
            return match self.store.conditional_update_balance(
                source,
                BalanceField::Available,
                amount,
                None,
            ) {
                Ok(()) => Err(ReserveError::Store(e)),
                Err(undo_err) => Err(ReserveError::UndoStuck { cause: undo_err }),
            };
        }
        Ok(())
    }

    /// Undo reserve-phase changes in reverse order and release the gate.
    ///
    /// Used before any permanent debit has happened. Failure here means
    /// the store broke mid-rollback and is unrecoverable.
    fn rollback(
        &self,
        loan_id: Uuid,
        record: &mut SettlementRecord,
        applied: &[Applied],
        failed_step: &str,
    ) -> Result<(), SettlementError> {
        for change in applied.iter().rev() {
            let Applied::Reserved { source, amount } = change else {
                continue;
            };
            if let Err(e) = self.release_reservation(source, *amount) {
                error!(
                    "rollback of loan {} stuck releasing {} from {}: {}",
                    loan_id, amount, source, e
                );
                record.mark_failed();
                self.persist_record(record);
                return Err(SettlementError::PartialFailureUnrecoverable {
                    loan_request_id: loan_id,
                    failed_step: format!("release reservation on {source} during {failed_step}"),
                    cause: e.to_string(),
                });
            }
        }
        self.revert_gate(loan_id);
        Ok(())
    }

    /// Reverse every applied change after a commit-phase failure.
    ///
    /// On success the loan reverts to `pending`, the record is marked
    /// compensated, and the caller receives `PartialFailureCompensated`.
    /// If any reversal fails, the failure is escalated to
    /// `PartialFailureUnrecoverable` — never dropped.
    fn compensate(
        &self,
        loan_id: Uuid,
        mut record: SettlementRecord,
        applied: Vec<Applied>,
        failed_step: &str,
        cause: StoreError,
    ) -> Result<SettlementRecord, SettlementError> {
        warn!(
            "compensating settlement of loan {} after failure at {}: {}",
            loan_id, failed_step, cause
        );

        for change in applied.iter().rev() {
            let outcome = match change {
                Applied::Reserved { source, amount } => self.release_reservation(source, *amount),
                // A debited slice's reservation is abandoned along with
                // the settlement, so the full amount returns to available.
                Applied::Debited { source, amount } => self.store.conditional_update_balance(
                    source,
                    BalanceField::Available,
                    *amount,
                    None,
                ),
                Applied::Credited { owner, amount } => self.store.conditional_update_wallet(
                    owner,
                    -*amount,
                    Some(*amount),
                ),
            };
            if let Err(e) = outcome {
                error!(
                    "compensation of loan {} stuck reversing {:?}: {}",
                    loan_id, change, e
                );
                record.mark_failed();
                self.persist_record(&record);
                return Err(SettlementError::PartialFailureUnrecoverable {
                    loan_request_id: loan_id,
                    failed_step: format!("{failed_step} (reversing {change:?})"),
                    cause: e.to_string(),
                });
            }
        }

        self.revert_gate(loan_id);
        record.mark_compensated();
        self.persist_record(&record);
        Err(SettlementError::PartialFailureCompensated {
            record: Box::new(record),
            failed_step: failed_step.to_string(),
        })
    }

    /// Move `amount` back from reserved to available.
    fn release_reservation(&self, source: &SourceId, amount: Decimal) -> Result<(), StoreError> {
        self.store.conditional_update_balance(
            source,
            BalanceField::Reserved,
            -amount,
            Some(Precondition::at_least(BalanceField::Reserved, amount)),
        )?;
        self.store
            .conditional_update_balance(source, BalanceField::Available, amount, None)
    }

    /// Best-effort return of the loan to `pending` after a failed or
    /// compensated attempt.
    fn revert_gate(&self, loan_id: Uuid) {
        if let Err(e) = self.store.conditional_transition_loan_status(
            loan_id,
            LoanStatus::Matching,
            LoanStatus::Pending,
        ) {
            error!("could not return loan {} to pending: {}", loan_id, e);
        }
    }

    /// Persist the record's current state, logging instead of failing:
    /// by the time this runs the balance outcome is already decided,
    /// and a stale stored record blocks replays rather than money.
    fn persist_record(&self, record: &SettlementRecord) {
        if let Err(e) = self.store.update_settlement_record(record) {
            error!(
                "could not persist settlement record {} ({}): {}",
                record.id(),
                record.status(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::funding::FundingSource;
    use crate::core::loan::LoanRequest;
    use crate::matching::allocation::AllocationEntry;
    use crate::matching::engine::MatchingEngine;
    use crate::matching::policy::MatchPolicy;
    use crate::settlement::memory::InMemoryLedger;
    use rust_decimal_macros::dec;

    fn seeded(
        requested: Decimal,
        balances: &[(&str, Decimal)],
    ) -> (InMemoryLedger, LoanRequest, Vec<FundingSource>) {
        let ledger = InMemoryLedger::new();
        let loan = LoanRequest::new(AccountId::new("USR-BORROWER"), requested);
        ledger.insert_loan(loan.clone());

        let sources: Vec<FundingSource> = balances
            .iter()
            .map(|(id, amount)| {
                FundingSource::new(
                    SourceId::new(*id),
                    AccountId::new(format!("USR-{id}")),
                    *amount,
                )
            })
            .collect();
        for s in &sources {
            ledger.insert_source(s.clone());
        }
        (ledger, loan, sources)
    }

    #[test]
    fn test_commit_moves_exact_amounts() {
        let (ledger, loan, sources) = seeded(dec!(300), &[("A", dec!(200)), ("B", dec!(150))]);
        let allocation =
            MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default()).unwrap();

        let coordinator = SettlementCoordinator::new(&ledger);
        let record = coordinator
            .settle(&allocation, &IdempotencyKey::new("k1"))
            .unwrap();

        assert_eq!(record.status(), crate::settlement::record::SettlementStatus::Committed);
        assert!(record.committed_at().is_some());

        let a = ledger.funding_source(&SourceId::new("A")).unwrap();
        let b = ledger.funding_source(&SourceId::new("B")).unwrap();
        assert_eq!(a.available(), Decimal::ZERO);
        assert_eq!(a.reserved(), Decimal::ZERO);
        assert_eq!(b.available(), dec!(50));
        assert_eq!(b.reserved(), Decimal::ZERO);
        assert_eq!(
            ledger.wallet_balance(&AccountId::new("USR-BORROWER")),
            dec!(300)
        );

        let stored = ledger
            .read_loan_request(loan.id())
            .unwrap();
        assert_eq!(stored.status(), LoanStatus::Funded);
    }

    #[test]
    fn test_replay_returns_stored_record_without_mutation() {
        let (ledger, loan, sources) = seeded(dec!(300), &[("A", dec!(200)), ("B", dec!(150))]);
        let allocation =
            MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default()).unwrap();

        let coordinator = SettlementCoordinator::new(&ledger);
        let key = IdempotencyKey::new("k1");
        let first = coordinator.settle(&allocation, &key).unwrap();
        let funds_after_first = ledger.total_funds();

        let replay = coordinator.settle(&allocation, &key).unwrap();
        assert_eq!(replay.id(), first.id());
        assert_eq!(replay.status(), first.status());
        assert_eq!(ledger.total_funds(), funds_after_first);
        assert_eq!(
            ledger.wallet_balance(&AccountId::new("USR-BORROWER")),
            dec!(300)
        );
    }

    #[test]
    fn test_gate_blocks_second_coordinator() {
        let (ledger, loan, sources) = seeded(dec!(100), &[("A", dec!(100))]);
        let allocation =
            MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default()).unwrap();

        // First coordinator claims the gate and stops there.
        ledger
            .conditional_transition_loan_status(loan.id(), LoanStatus::Pending, LoanStatus::Matching)
            .unwrap();

        let coordinator = SettlementCoordinator::new(&ledger);
        let err = coordinator
            .settle(&allocation, &IdempotencyKey::new("k2"))
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::ConcurrentModification { .. }
        ));
    }

    #[test]
    fn test_reservation_failure_releases_prior_reservations() {
        let (ledger, loan, sources) = seeded(dec!(300), &[("A", dec!(200)), ("B", dec!(150))]);
        let allocation =
            MatchingEngine::match_loan(&loan, &sources, &MatchPolicy::default()).unwrap();

        // B's funds vanish between matching and settlement.
        ledger
            .conditional_update_balance(
                &SourceId::new("B"),
                BalanceField::Available,
                dec!(-120),
                None,
            )
            .unwrap();

        let coordinator = SettlementCoordinator::new(&ledger);
        let err = coordinator
            .settle(&allocation, &IdempotencyKey::new("k3"))
            .unwrap_err();
        match err {
            SettlementError::InsufficientFunds { source_id, needed, step } => {
                assert_eq!(source_id.as_str(), "B");
                assert_eq!(needed, dec!(100));
                assert_eq!(step, 1);
            }
            other => panic!("expected InsufficientFunds, got {other}"),
        }

        // A's reservation was released and the loan is pending again.
        let a = ledger.funding_source(&SourceId::new("A")).unwrap();
        assert_eq!(a.available(), dec!(200));
        assert_eq!(a.reserved(), Decimal::ZERO);
        let stored = ledger.read_loan_request(loan.id()).unwrap();
        assert_eq!(stored.status(), LoanStatus::Pending);
    }

    #[test]
    fn test_cancel_pending_loan() {
        let (ledger, loan, _) = seeded(dec!(100), &[("A", dec!(100))]);
        let coordinator = SettlementCoordinator::new(&ledger);
        coordinator.cancel_loan(loan.id()).unwrap();
        let stored = ledger.read_loan_request(loan.id()).unwrap();
        assert_eq!(stored.status(), LoanStatus::Cancelled);
    }

    #[test]
    fn test_cancel_rejected_while_matching() {
        let (ledger, loan, _) = seeded(dec!(100), &[("A", dec!(100))]);
        ledger
            .conditional_transition_loan_status(loan.id(), LoanStatus::Pending, LoanStatus::Matching)
            .unwrap();

        let coordinator = SettlementCoordinator::new(&ledger);
        assert!(matches!(
            coordinator.cancel_loan(loan.id()),
            Err(SettlementError::ConcurrentModification { .. })
        ));
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let (ledger, loan, _) = seeded(dec!(300), &[("A", dec!(200))]);
        let allocation = Allocation::new(
            loan.id(),
            vec![AllocationEntry::new(SourceId::new("A"), dec!(200))],
        );

        let coordinator = SettlementCoordinator::new(&ledger);
        assert!(matches!(
            coordinator.settle(&allocation, &IdempotencyKey::new("k4")),
            Err(SettlementError::InvalidRequest { .. })
        ));
    }
}
