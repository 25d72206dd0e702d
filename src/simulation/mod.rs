//! Stress testing and fault injection.

pub mod fault;
