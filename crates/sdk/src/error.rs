//! SDK Error Types

use jsonrpsee::core::ClientError;
use thiserror::Error;

/// Error code the daemon uses for unknown job ids
pub const NOT_FOUND_CODE: i32 = 4001;

/// SDK Result type
pub type Result<T> = std::result::Result<T, SdkError>;

/// SDK Error
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("RPC error ({code}): {message}")]
    Rpc { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Other error: {0}")]
    Other(String),
}

impl SdkError {
    /// The job is unknown to the daemon, usually because it restarted or reaped the job
    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::Rpc { code, .. } if *code == NOT_FOUND_CODE)
    }
}

impl From<ClientError> for SdkError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Call(call) => SdkError::Rpc {
                code: call.code(),
                message: call.message().to_string(),
            },
            ClientError::Transport(e) => SdkError::Transport(e.to_string()),
            ClientError::RequestTimeout => SdkError::Timeout,
            ClientError::RestartNeeded(reason) => SdkError::Connection(reason.to_string()),
            ClientError::ParseError(e) => SdkError::Serialization(e),
            other => SdkError::Other(other.to_string()),
        }
    }
}
