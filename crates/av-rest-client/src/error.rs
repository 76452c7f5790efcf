//! Error types for the REST API client

use av_rest_api_contract::ProblemDetails;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when using the REST API client
#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("API contract error: {0}")]
    ApiContract(#[from] av_rest_api_contract::ApiContractError),

    #[error("Authentication error: {0}")]
    Auth(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Server returned error status {status}: {}", .details.detail)]
    ServerError {
        status: StatusCode,
        details: ProblemDetails,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedResponse { status: StatusCode, body: String },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
}

/// Result type alias for REST client operations
pub type RestClientResult<T> = Result<T, RestClientError>;
