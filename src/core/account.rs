use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an account holder in the lending network.
///
/// An account can represent a borrower, an investor funding loans,
/// or any entity whose wallet balance the ledger tracks.
///
/// # Examples
///
/// ```
/// use funding_engine::core::account::AccountId;
///
/// let borrower = AccountId::new("USR-BORROWER-01");
/// let investor = AccountId::new("USR-INVESTOR-07");
/// assert_ne!(borrower, investor);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this account ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
