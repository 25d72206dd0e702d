//! Pure matching: splitting a loan request across funding sources.

pub mod allocation;
pub mod engine;
pub mod policy;
