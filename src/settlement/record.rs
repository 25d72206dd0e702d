use crate::matching::allocation::Allocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-chosen token that makes a settlement attempt replayable.
///
/// Retrying `settle` with the same key after a committed or compensated
/// outcome returns the stored result without touching any balance.
/// Callers must keep the key stable across retries of the same logical
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Outcome state of a settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Created when settlement begins; not yet resolved.
    Pending,
    /// Every debit and the borrower credit succeeded.
    Committed,
    /// The attempt failed: either no balance change stuck (a failed
    /// reservation with all prior reservations released), or an
    /// unrecoverable failure was escalated for manual reconciliation.
    Failed,
    /// A mid-commit failure occurred and every applied step was
    /// reversed; the loan is back in `pending` and re-matchable.
    Compensated,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Committed => "committed",
            SettlementStatus::Failed => "failed",
            SettlementStatus::Compensated => "compensated",
        };
        write!(f, "{}", s)
    }
}

/// Durable record of one settlement attempt.
///
/// Holds a snapshot of the allocation it applied, so the stored result
/// of a replayed idempotency key is self-describing even if the live
/// loan or sources have since changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    id: Uuid,
    idempotency_key: IdempotencyKey,
    loan_request_id: Uuid,
    allocation: Allocation,
    status: SettlementStatus,
    attempted_at: DateTime<Utc>,
    committed_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    /// Create a fresh pending record for a settlement attempt.
    pub fn begin(idempotency_key: IdempotencyKey, allocation: Allocation) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key,
            loan_request_id: allocation.loan_request_id(),
            allocation,
            status: SettlementStatus::Pending,
            attempted_at: Utc::now(),
            committed_at: None,
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn loan_request_id(&self) -> Uuid {
        self.loan_request_id
    }

    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    pub fn attempted_at(&self) -> DateTime<Utc> {
        self.attempted_at
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    /// Whether this record is finished and safe to replay.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            SettlementStatus::Committed | SettlementStatus::Failed | SettlementStatus::Compensated
        )
    }

    /// Mark the record committed, stamping the commit time.
    pub(crate) fn mark_committed(&mut self) {
        self.status = SettlementStatus::Committed;
        self.committed_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = SettlementStatus::Failed;
    }

    pub(crate) fn mark_compensated(&mut self) {
        self.status = SettlementStatus::Compensated;
    }
}
