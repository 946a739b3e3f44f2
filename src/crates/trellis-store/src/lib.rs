//! # trellis-store
//!
//! SQLite-backed implementations of the engine's repository traits
//! ([`WorkflowStore`] and [`ExecutionStateStore`]). Workflow definitions and
//! execution snapshots are stored as JSON blob columns keyed by
//! `(tenant, id)`; the schema is created on connect. SQLite serializes
//! writes per database, which satisfies the per-key write ordering the
//! persistence boundary requires.

pub mod sqlite;

pub use sqlite::{SqliteExecutionStateStore, SqliteStores, SqliteWorkflowStore};
