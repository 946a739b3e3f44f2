//! Tenant resolution
//!
//! Tenant identity comes from a bearer-token claim (configurable name,
//! default `tenant_id`). Signature verification belongs to the fronting
//! gateway; here the payload segment is decoded and the claim extracted. A
//! configured fallback tenant allows unauthenticated dev/test use.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use trellis_core::tenant::TenantId;

use crate::api::error::ApiError;
use crate::api::validate::validate_identifier;

/// Resolves the tenant for each request.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    claim: String,
    fallback: Option<String>,
}

impl TenantResolver {
    pub fn new(claim: impl Into<String>, fallback: Option<String>) -> Self {
        Self {
            claim: claim.into(),
            fallback,
        }
    }

    /// Resolve the tenant from request headers.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<TenantId, ApiError> {
        if let Some(token) = bearer_token(headers) {
            let tenant = self.claim_from_token(token)?;
            validate_identifier(&tenant)?;
            return Ok(TenantId::new(tenant));
        }
        match &self.fallback {
            Some(tenant) => Ok(TenantId::new(tenant.clone())),
            None => Err(ApiError::Unauthorized(
                "missing bearer token and no fallback tenant configured".to_string(),
            )),
        }
    }

    fn claim_from_token(&self, token: &str) -> Result<String, ApiError> {
        let mut segments = token.split('.');
        let payload = match (segments.next(), segments.next()) {
            (Some(_header), Some(payload)) => payload,
            _ => return Err(ApiError::Unauthorized("malformed bearer token".to_string())),
        };
        let decoded = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| ApiError::Unauthorized("malformed token payload".to_string()))?;
        let claims: Value = serde_json::from_slice(&decoded)
            .map_err(|_| ApiError::Unauthorized("token payload is not JSON".to_string()))?;
        claims
            .get(&self.claim)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("token is missing the '{}' claim", self.claim))
            })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
