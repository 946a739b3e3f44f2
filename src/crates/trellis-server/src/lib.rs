//! # trellis-server
//!
//! HTTP surface for Trellis: tenant-scoped workflow CRUD, execution
//! lifecycle (start / status / resume / result / cancel), a server-sent
//! event stream of execution lifecycle events, and the MCP split-pipe
//! endpoints (downstream SSE stream plus inbound JSON-RPC submission).
//!
//! The server hosts the core engine with the server-side action executor
//! (no local shell; `mcp` sends go through the split pipe) and persists
//! workflow definitions and execution snapshots through the repository
//! traits, SQLite by default and in-memory for tests.

pub mod api;
pub mod config;
pub mod service;

pub use api::{create_router, AppState};
pub use config::ServerConfig;
pub use service::{ExecutionService, ExecutionStatus};
