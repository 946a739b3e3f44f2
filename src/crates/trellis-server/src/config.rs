//! Server configuration
//!
//! Loaded from a TOML file with environment overrides. The dev-mode fallback
//! tenant makes unauthenticated local testing possible; production
//! deployments leave it unset and require a bearer token.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, e.g. "127.0.0.1:8080".
    pub listen: String,
    /// SQLite database URL; `sqlite::memory:` keeps everything in-process.
    pub database_url: String,
    /// JWT claim carrying the tenant id.
    pub tenant_claim: String,
    /// Tenant assumed when no bearer token is presented (dev/test only).
    pub fallback_tenant: Option<String>,
    /// Default MCP request timeout in seconds.
    pub mcp_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            database_url: "sqlite::memory:".to_string(),
            tenant_claim: "tenant_id".to_string(),
            fallback_tenant: None,
            mcp_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Read a TOML file, then apply `TRELLIS_*` environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };

        if let Ok(listen) = std::env::var("TRELLIS_LISTEN") {
            config.listen = listen;
        }
        if let Ok(url) = std::env::var("TRELLIS_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(claim) = std::env::var("TRELLIS_TENANT_CLAIM") {
            config.tenant_claim = claim;
        }
        if let Ok(tenant) = std::env::var("TRELLIS_FALLBACK_TENANT") {
            config.fallback_tenant = Some(tenant);
        }
        Ok(config)
    }
}
