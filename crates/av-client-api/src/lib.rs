//! Client API trait for the avatar computation service

use async_trait::async_trait;
use av_rest_api_contract::*;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientApiError {
    #[error("server error: {0}")]
    Server(String),
    #[error("too many requests, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected: {0}")]
    Unexpected(String),
}

pub type ClientApiResult<T> = Result<T, ClientApiError>;

#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn create_avatar(&self, request: &CreateAvatarRequest) -> ClientApiResult<AvatarData>;

    async fn get_avatar(&self, avatar_code: &str) -> ClientApiResult<AvatarData>;

    async fn get_parameters(
        &self,
        pipeline: &str,
        pipeline_subtype: &str,
        subset: ParametersSubset,
    ) -> ClientApiResult<ComputationParameters>;

    async fn get_haircuts(&self, avatar: &AvatarData) -> ClientApiResult<Vec<HaircutData>>;

    /// Fetch the raw bytes behind an artifact URL reported by the service.
    async fn download(&self, url: &url::Url) -> ClientApiResult<Vec<u8>>;
}
