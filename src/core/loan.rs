use crate::core::account::AccountId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a loan request.
///
/// Legal transitions:
///
/// - `Pending → Matching` — a settlement coordinator claims the loan
///   (this transition is the per-loan mutual-exclusion gate).
/// - `Matching → Funded` — settlement committed.
/// - `Matching → Pending` — settlement compensated; the loan can be
///   re-matched.
/// - `Pending → Cancelled` and `Matching → Cancelled` — the latter is
///   reserved for operator intervention after an unrecoverable failure;
///   ordinary cancellation is rejected while a settlement is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Matching,
    Funded,
    Cancelled,
}

impl LoanStatus {
    /// Whether a transition from `self` to `to` is legal.
    pub fn can_transition(self, to: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, to),
            (Pending, Matching)
                | (Matching, Funded)
                | (Matching, Pending)
                | (Pending, Cancelled)
                | (Matching, Cancelled)
        )
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Funded | LoanStatus::Cancelled)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Matching => "matching",
            LoanStatus::Funded => "funded",
            LoanStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A borrower's request for funds.
///
/// Requests are created in `Pending` and mutated only by the settlement
/// coordinator (or cancellation). The matching engine reads them but
/// never writes.
///
/// # Examples
///
/// ```
/// use funding_engine::core::account::AccountId;
/// use funding_engine::core::loan::{LoanRequest, LoanStatus};
/// use rust_decimal_macros::dec;
///
/// let loan = LoanRequest::new(AccountId::new("USR-BORROWER-01"), dec!(300));
/// assert_eq!(loan.status(), LoanStatus::Pending);
/// assert_eq!(loan.requested_amount(), dec!(300));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRequest {
    /// Unique identifier for this request.
    id: Uuid,
    /// The account requesting funds.
    borrower: AccountId,
    /// The amount requested. Must be positive.
    requested_amount: Decimal,
    /// Current lifecycle state.
    status: LoanStatus,
    /// When this request was created.
    created_at: DateTime<Utc>,
}

impl LoanRequest {
    /// Create a new pending loan request.
    ///
    /// # Panics
    ///
    /// Panics if `requested_amount` is not positive.
    pub fn new(borrower: AccountId, requested_amount: Decimal) -> Self {
        assert!(
            requested_amount > Decimal::ZERO,
            "requested amount must be positive, got {}",
            requested_amount
        );
        Self {
            id: Uuid::new_v4(),
            borrower,
            requested_amount,
            status: LoanStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Create a request with a specific ID (useful for testing / determinism).
    pub fn with_id(id: Uuid, borrower: AccountId, requested_amount: Decimal) -> Self {
        assert!(requested_amount > Decimal::ZERO);
        Self {
            id,
            borrower,
            requested_amount,
            status: LoanStatus::Pending,
            created_at: Utc::now(),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn borrower(&self) -> &AccountId {
        &self.borrower
    }

    pub fn requested_amount(&self) -> Decimal {
        self.requested_amount
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Apply a status transition.
    ///
    /// Returns `false` and leaves the request untouched if the
    /// transition is not legal from the current state.
    pub fn transition(&mut self, from: LoanStatus, to: LoanStatus) -> bool {
        if self.status != from || !from.can_transition(to) {
            return false;
        }
        self.status = to;
        true
    }
}
