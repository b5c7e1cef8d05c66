//! Persistence layer — libSQL-backed storage for batches, items and the apply log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::TriageStore;
