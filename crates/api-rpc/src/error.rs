//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use joblane_core::domain::DomainError;
use joblane_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SYSTEM_ERROR: i32 = 5002;
}

fn owned(code: i32, message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, message.into(), None::<()>)
}

/// Unknown ids get a hint: registries are in-memory and do not survive restarts
pub fn job_not_found(job_id: &str) -> ErrorObjectOwned {
    owned(
        code::NOT_FOUND,
        format!("Job {} not found (server may have restarted)", job_id),
    )
}

pub fn from_domain(err: DomainError) -> ErrorObjectOwned {
    match err {
        DomainError::JobNotFound(id) => job_not_found(&id),
        DomainError::ValidationError(msg) => owned(code::VALIDATION_ERROR, msg),
        e @ (DomainError::DuplicateJob(_)
        | DomainError::TerminalStateViolation { .. }
        | DomainError::InvalidStateTransition { .. }) => owned(code::CONFLICT, e.to_string()),
    }
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Domain(e) => from_domain(e),
        AppError::Validation(msg) => owned(code::VALIDATION_ERROR, msg),
        AppError::NotFound(msg) => owned(code::NOT_FOUND, msg),
        AppError::Conflict(msg) => owned(code::CONFLICT, msg),
        AppError::Execution(e) => owned(code::SYSTEM_ERROR, e.to_string()),
        AppError::Io(e) => owned(code::SYSTEM_ERROR, e.to_string()),
        AppError::Serialization(e) => owned(code::VALIDATION_ERROR, e.to_string()),
        AppError::Config(msg) | AppError::Internal(msg) => owned(code::INTERNAL_ERROR, msg),
    }
}
