//! Core error types for avatar generation.

use av_client_api::ClientApiError;
use av_rest_api_contract::ApiContractError;

/// Core error type for all orchestration operations.
///
/// Errors are `Clone` because a finished task hands the same failure to every
/// holder of its handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Avatar calculations failed, status: {status}")]
    ComputationFailed { status: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Serialization error: {message}")]
    Serde { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Task error: {message}")]
    Task { message: String },

    #[error("Task misuse: {message}")]
    Misuse { message: String },

    #[error("Task cancelled")]
    Cancelled,
}

impl Error {
    /// Create a new task-related error.
    pub fn task<S: Into<String>>(message: S) -> Self {
        Self::Task {
            message: message.into(),
        }
    }

    /// Create an error for a programming mistake such as finishing a task twice.
    pub fn misuse<S: Into<String>>(message: S) -> Self {
        Self::Misuse {
            message: message.into(),
        }
    }

    /// Create an error for a bad terminal status reported by the server.
    pub fn computation_failed<S: Into<String>>(status: S) -> Self {
        Self::ComputationFailed {
            status: status.into(),
        }
    }

    /// Create a new archive extraction error.
    pub fn archive<S: Into<String>>(message: S) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde {
            message: e.to_string(),
        }
    }
}

impl From<ClientApiError> for Error {
    fn from(e: ClientApiError) -> Self {
        Self::Network {
            message: e.to_string(),
        }
    }
}

impl From<ApiContractError> for Error {
    fn from(e: ApiContractError) -> Self {
        Self::InvalidRequest {
            message: e.to_string(),
        }
    }
}
