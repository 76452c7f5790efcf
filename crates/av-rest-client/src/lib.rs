//! REST API client for the avatar computation service
//!
//! This crate provides the HTTP implementation of [`CloudApi`]: authentication,
//! JSON request/response handling, artifact downloads and throttling detection.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::*;
pub use client::*;
pub use error::*;

use async_trait::async_trait;
use av_client_api::{ClientApiError, ClientApiResult, CloudApi};
use av_rest_api_contract::*;
use std::time::Duration;

/// Retry period assumed when a throttled response carries no `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

impl From<RestClientError> for ClientApiError {
    fn from(e: RestClientError) -> Self {
        match e {
            RestClientError::RateLimited { retry_after } => ClientApiError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            },
            RestClientError::NotFound(url) => ClientApiError::NotFound(url),
            RestClientError::Json(e) => ClientApiError::Unexpected(e.to_string()),
            other => ClientApiError::Server(other.to_string()),
        }
    }
}

#[async_trait]
impl CloudApi for client::RestClient {
    async fn create_avatar(&self, request: &CreateAvatarRequest) -> ClientApiResult<AvatarData> {
        Ok(self.create_avatar(request).await?)
    }

    async fn get_avatar(&self, avatar_code: &str) -> ClientApiResult<AvatarData> {
        Ok(self.get_avatar(avatar_code).await?)
    }

    async fn get_parameters(
        &self,
        pipeline: &str,
        pipeline_subtype: &str,
        subset: ParametersSubset,
    ) -> ClientApiResult<ComputationParameters> {
        Ok(self.get_parameters(pipeline, pipeline_subtype, subset).await?)
    }

    async fn get_haircuts(&self, avatar: &AvatarData) -> ClientApiResult<Vec<HaircutData>> {
        Ok(self.get_haircuts(avatar).await?)
    }

    async fn download(&self, url: &url::Url) -> ClientApiResult<Vec<u8>> {
        Ok(self.download(url).await?)
    }
}
