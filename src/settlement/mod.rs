//! Atomic application of allocations against the shared ledger store.

pub mod coordinator;
pub mod memory;
pub mod record;
pub mod store;
