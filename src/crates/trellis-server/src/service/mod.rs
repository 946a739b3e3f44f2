//! Service layer

pub mod execution;

pub use execution::{
    ExecutionService, ExecutionStatus, ExecutionView, PlanView, ServiceError, ServiceResult,
};
