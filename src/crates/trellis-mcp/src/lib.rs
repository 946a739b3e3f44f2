//! # trellis-mcp
//!
//! Split-pipe MCP transport for Trellis. The engine pushes JSON-RPC 2.0
//! request frames to external clients over a per-client server-push stream;
//! client responses arrive on a separate inbound submission endpoint and are
//! correlated back to the waiting caller by request id.
//!
//! The crate also adapts the transport onto the engine's seams: an
//! [`McpToolInvoker`] for plan execution and an [`McpActionHandler`] for the
//! server-side action executor's `mcp` handler id.

pub mod pool;
pub mod protocol;
pub mod session;
pub mod transport;

pub use pool::{ConnectionPool, McpConnection, SseConnection};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpError, JSONRPC_VERSION};
pub use session::{ClientStatus, McpSessionManager, SessionStatus, DEFAULT_REQUEST_TIMEOUT};
pub use transport::{McpActionHandler, McpToolClient, McpToolInvoker, TOOL_CACHE_TTL};
