//! Tenant identity
//!
//! Every execution, repository call and MCP connection is scoped to a tenant.
//! The tenant is carried as an explicit value on the
//! [`ExecutionContext`](crate::exec::ExecutionContext) rather than thread-local
//! storage, so branch tasks spawned by Parallel and Fork nodes inherit it by
//! construction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of the current request.
///
/// Bound when a request enters the system (from a bearer-token claim or a
/// configured fallback) and propagated across every task boundary by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
