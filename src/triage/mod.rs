//! Inbox triage — batch building, approvals and applying label changes.
//!
//! A run snapshots the inbox into an immutable batch of suggestions. A human
//! approves some items (optionally changing their category); applying turns
//! approved items into mailbox label changes exactly once each.

pub mod apply;
pub mod builder;
pub mod ledger;
pub mod model;
pub mod resolver;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::ApplyEngine;
pub use builder::BatchBuilder;
pub use ledger::ApprovalLedger;
pub use resolver::BatchResolver;
pub use service::{RunOutcome, TriageService, TriageServiceParts};
