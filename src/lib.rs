//! Inbox triage — batch suggestions, human approval and label application.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod routes;
pub mod store;
pub mod suggest;
pub mod triage;
