use crate::core::account::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a funding source.
///
/// A funding source is a pool of money one account has made available
/// for lending. An account may hold several sources (e.g. one per
/// investment product), so sources carry their own identity separate
/// from their owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A lender's pool of investable funds.
///
/// `available` is the amount the matching engine may allocate;
/// `reserved` holds amounts claimed by an in-flight settlement.
/// Neither field ever goes negative; the ledger store enforces this
/// through conditional updates.
///
/// # Examples
///
/// ```
/// use funding_engine::core::account::AccountId;
/// use funding_engine::core::funding::{FundingSource, SourceId};
/// use rust_decimal_macros::dec;
///
/// let source = FundingSource::new(
///     SourceId::new("SRC-A"),
///     AccountId::new("USR-INVESTOR-01"),
///     dec!(5000),
/// );
/// assert_eq!(source.available(), dec!(5000));
/// assert_eq!(source.reserved(), rust_decimal::Decimal::ZERO);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSource {
    /// Unique identifier for this source.
    id: SourceId,
    /// The account that owns the funds.
    owner: AccountId,
    /// Amount available for allocation. Never negative.
    available: Decimal,
    /// Amount held by in-flight settlements. Never negative.
    reserved: Decimal,
}

impl FundingSource {
    /// Create a new funding source with no reservations.
    ///
    /// # Panics
    ///
    /// Panics if `available` is negative.
    pub fn new(id: SourceId, owner: AccountId, available: Decimal) -> Self {
        assert!(
            available >= Decimal::ZERO,
            "available balance must be non-negative, got {}",
            available
        );
        Self {
            id,
            owner,
            available,
            reserved: Decimal::ZERO,
        }
    }

    /// Create a source with an existing reservation (useful for tests
    /// and for hydrating from a backing store).
    pub fn with_reserved(
        id: SourceId,
        owner: AccountId,
        available: Decimal,
        reserved: Decimal,
    ) -> Self {
        assert!(available >= Decimal::ZERO && reserved >= Decimal::ZERO);
        Self {
            id,
            owner,
            available,
            reserved,
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn owner(&self) -> &AccountId {
        &self.owner
    }

    pub fn available(&self) -> Decimal {
        self.available
    }

    pub fn reserved(&self) -> Decimal {
        self.reserved
    }

    /// Total funds this source holds, reserved or not.
    pub fn total(&self) -> Decimal {
        self.available + self.reserved
    }
}
