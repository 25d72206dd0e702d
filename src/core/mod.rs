//! Foundational types: accounts, funding sources, loan requests.

pub mod account;
pub mod funding;
pub mod loan;
