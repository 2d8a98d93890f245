//! Synchronization pipeline: identity resolution, ownership writes,
//! achievement reconciliation, library aggregation, and the per-user
//! orchestrator that drives them.

pub mod achievements;
pub mod aggregate;
pub mod identity;
pub mod orchestrator;
pub mod ownership;
