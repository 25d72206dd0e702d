use crate::core::funding::FundingSource;
use crate::core::loan::{LoanRequest, LoanStatus};
use crate::matching::allocation::{Allocation, AllocationEntry};
use crate::matching::policy::MatchPolicy;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors arising from a match attempt.
///
/// Matching errors are terminal: retrying with the same inputs cannot
/// succeed, only new candidates or a changed policy can.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The loan request is not matchable (wrong status or bad amount).
    /// A caller bug, never retried.
    #[error("invalid loan request: {reason}")]
    InvalidRequest { reason: String },

    /// No combination of candidates covers the requested amount under
    /// the policy. A business outcome, surfaced to the operator.
    #[error(
        "no match found for loan {loan_request_id}: requested {requested}, \
         aggregate available {aggregate_available}"
    )]
    NoMatchFound {
        loan_request_id: uuid::Uuid,
        requested: Decimal,
        aggregate_available: Decimal,
    },
}

/// The core matching engine.
///
/// Splits a loan request across candidate funding sources using a
/// greedy descending-balance fill. Pure: reads snapshots, mutates
/// nothing, and is fully deterministic given its inputs.
pub struct MatchingEngine;

impl MatchingEngine {
    /// Produce an allocation fully covering the loan's requested amount,
    /// or a typed error when none exists.
    ///
    /// # Algorithm
    ///
    /// 1. Sort candidates by available balance descending, tie-broken by
    ///    id ascending, so identical inputs always yield identical output.
    /// 2. Take sources in order, allocating `min(remaining, available)`
    ///    per step.
    /// 3. Skip any source whose slice would fall below
    ///    `min_allocation_amount`, unless that slice exactly zeroes the
    ///    remainder.
    /// 4. Stop when the remainder reaches zero or `max_sources_per_loan`
    ///    entries have been taken.
    ///
    /// Greedy fill does not claim optimality, only a defined tie-break
    /// and termination contract.
    pub fn match_loan(
        loan: &LoanRequest,
        candidates: &[FundingSource],
        policy: &MatchPolicy,
    ) -> Result<Allocation, MatchError> {
        if loan.status() != LoanStatus::Pending {
            return Err(MatchError::InvalidRequest {
                reason: format!("loan status is {}, expected pending", loan.status()),
            });
        }
        if loan.requested_amount() <= Decimal::ZERO {
            return Err(MatchError::InvalidRequest {
                reason: format!(
                    "requested amount must be positive, got {}",
                    loan.requested_amount()
                ),
            });
        }

        let mut ordered: Vec<&FundingSource> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            b.available()
                .cmp(&a.available())
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut remaining = loan.requested_amount();
        let mut entries: Vec<AllocationEntry> = Vec::new();

        for source in ordered {
            if entries.len() == policy.max_sources_per_loan {
                break;
            }
            let slice = remaining.min(source.available());
            if slice <= Decimal::ZERO {
                continue;
            }
            // A slice below the policy floor is only acceptable when it
            // closes out the loan exactly.
            if slice < policy.min_allocation_amount && slice != remaining {
                continue;
            }
            entries.push(AllocationEntry::new(source.id().clone(), slice));
            remaining -= slice;
            if remaining == Decimal::ZERO {
                break;
            }
        }

        if remaining > Decimal::ZERO {
            return Err(MatchError::NoMatchFound {
                loan_request_id: loan.id(),
                requested: loan.requested_amount(),
                aggregate_available: candidates.iter().map(|s| s.available()).sum(),
            });
        }

        Ok(Allocation::new(loan.id(), entries))
    }
}
