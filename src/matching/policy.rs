use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operator-tunable constraints on how a loan may be split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPolicy {
    /// Maximum number of funding sources a single loan may draw from.
    pub max_sources_per_loan: usize,
    /// Smallest amount worth allocating from any one source.
    ///
    /// Prevents fragmenting a loan into dust-sized slices. The final
    /// slice of an allocation is exempt when it exactly zeroes the
    /// remainder, so a loan is never rejected solely because its last
    /// slice is small.
    pub min_allocation_amount: Decimal,
}

impl MatchPolicy {
    pub fn new(max_sources_per_loan: usize, min_allocation_amount: Decimal) -> Self {
        Self {
            max_sources_per_loan,
            min_allocation_amount,
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            max_sources_per_loan: 10,
            min_allocation_amount: Decimal::ONE,
        }
    }
}
