use crate::core::funding::SourceId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One slice of an allocation: how much a single source contributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub source_id: SourceId,
    pub amount: Decimal,
}

impl AllocationEntry {
    pub fn new(source_id: SourceId, amount: Decimal) -> Self {
        Self { source_id, amount }
    }
}

/// A concrete split of a loan's requested amount across funding sources.
///
/// Produced by the matching engine and consumed by the settlement
/// coordinator. Entries are ordered; settlement applies them strictly
/// in this order. The total always equals the loan's requested amount —
/// partial allocations are never produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    loan_request_id: Uuid,
    entries: Vec<AllocationEntry>,
    total_allocated: Decimal,
}

impl Allocation {
    /// Build an allocation from ordered entries.
    ///
    /// # Panics
    ///
    /// Panics if any entry amount is not positive; the matching engine
    /// never emits such entries.
    pub fn new(loan_request_id: Uuid, entries: Vec<AllocationEntry>) -> Self {
        assert!(
            entries.iter().all(|e| e.amount > Decimal::ZERO),
            "allocation entries must be positive"
        );
        let total_allocated = entries.iter().map(|e| e.amount).sum();
        Self {
            loan_request_id,
            entries,
            total_allocated,
        }
    }

    // --- Accessors ---

    pub fn loan_request_id(&self) -> Uuid {
        self.loan_request_id
    }

    pub fn entries(&self) -> &[AllocationEntry] {
        &self.entries
    }

    pub fn total_allocated(&self) -> Decimal {
        self.total_allocated
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Allocation for loan {}:", self.loan_request_id)?;
        for entry in &self.entries {
            writeln!(f, "  {} -> {}", entry.source_id, entry.amount)?;
        }
        write!(f, "  total: {}", self.total_allocated)
    }
}
