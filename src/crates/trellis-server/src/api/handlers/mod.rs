//! Endpoint handlers

pub mod executions;
pub mod health;
pub mod mcp;
pub mod workflows;

use crate::api::error::ApiError;
use crate::service::ServiceError;

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::NotFound(msg),
            ServiceError::Invalid(msg) => ApiError::BadRequest(msg),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Store(err) => ApiError::Internal(err.to_string()),
        }
    }
}
