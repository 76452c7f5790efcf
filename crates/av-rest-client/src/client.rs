//! Main REST API client implementation

use av_rest_api_contract::*;
use base64::Engine;
use reqwest::{header, Client as HttpClient, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::auth::AuthConfig;
use crate::error::{RestClientError, RestClientResult};

/// Wire body of `POST avatars/`
#[derive(Debug, Serialize)]
pub(crate) struct CreateAvatarBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    description: &'a str,
    pipeline: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    pipeline_subtype: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a ComputationParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selfie_code: Option<&'a str>,
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

impl<'a> CreateAvatarBody<'a> {
    pub(crate) fn from_request(request: &'a CreateAvatarRequest) -> Self {
        let (photo, selfie_code) = match &request.source {
            PhotoSource::Photo(bytes) => {
                (Some(base64::engine::general_purpose::STANDARD.encode(bytes)), None)
            }
            PhotoSource::Selfie(code) => (None, Some(code.as_str())),
        };
        Self {
            name: &request.name,
            description: &request.description,
            pipeline: &request.pipeline,
            pipeline_subtype: &request.pipeline_subtype,
            parameters: request.parameters.as_ref(),
            photo,
            selfie_code,
        }
    }
}

/// REST API client for the avatar computation service
#[derive(Debug, Clone)]
pub struct RestClient {
    http_client: HttpClient,
    base_url: Url,
    auth: AuthConfig,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(base_url: Url, auth: AuthConfig) -> RestClientResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent(concat!("av-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            auth,
        })
    }

    /// Create a client from a base URL string
    ///
    /// Endpoint paths are resolved relative to the base, so a trailing slash
    /// is added when missing.
    pub fn from_url(base_url: &str, auth: AuthConfig) -> RestClientResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self::new(base_url, auth)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Register a new avatar and start its computation
    pub async fn create_avatar(&self, request: &CreateAvatarRequest) -> RestClientResult<AvatarData> {
        validation::validate_create_avatar_request(request)?;
        let url = self.base_url.join("avatars/")?;
        self.request(Method::POST, url, Some(&CreateAvatarBody::from_request(request)))
            .await
    }

    /// Get the current record of an avatar
    pub async fn get_avatar(&self, avatar_code: &str) -> RestClientResult<AvatarData> {
        let url = self.base_url.join(&format!("avatars/{}/", avatar_code))?;
        self.get(url).await
    }

    /// Get computation parameters for a pipeline
    pub async fn get_parameters(
        &self,
        pipeline: &str,
        pipeline_subtype: &str,
        subset: ParametersSubset,
    ) -> RestClientResult<ComputationParameters> {
        let url = self.parameters_url(pipeline, pipeline_subtype, subset)?;
        self.get(url).await
    }

    /// List haircuts generated for an avatar
    pub async fn get_haircuts(&self, avatar: &AvatarData) -> RestClientResult<Vec<HaircutData>> {
        let url = match &avatar.haircuts {
            Some(url) => url.clone(),
            None => self.base_url.join(&format!("avatars/{}/haircuts/", avatar.code))?,
        };
        self.get(url).await
    }

    /// Download the raw bytes of an artifact
    pub async fn download(&self, url: &Url) -> RestClientResult<Vec<u8>> {
        let response = self
            .http_client
            .get(url.clone())
            .headers(self.auth.headers()?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let bytes = response.bytes().await?;
            debug!(%url, size = bytes.len(), "Downloaded artifact");
            Ok(bytes.to_vec())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    pub(crate) fn parameters_url(
        &self,
        pipeline: &str,
        pipeline_subtype: &str,
        subset: ParametersSubset,
    ) -> RestClientResult<Url> {
        let mut url = self
            .base_url
            .join(&format!("parameters/{}/{}/", subset.path_segment(), pipeline))?;
        if !pipeline_subtype.is_empty() {
            url.query_pairs_mut().append_pair("pipeline_subtype", pipeline_subtype);
        }
        Ok(url)
    }

    // Private helper methods

    async fn get<T: DeserializeOwned>(&self, url: Url) -> RestClientResult<T> {
        self.request(Method::GET, url, None::<&()>).await
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> RestClientResult<T> {
        let mut request = self
            .http_client
            .request(method, url)
            .headers(self.auth.headers()?);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> RestClientResult<T> {
        if response.status().is_success() {
            let text = response.text().await?;
            serde_json::from_str(&text).map_err(RestClientError::from)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn error_from_response(response: Response) -> RestClientError {
        let status = response.status();
        let url = response.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            warn!(%url, ?retry_after, "Request throttled by server");
            return RestClientError::RateLimited { retry_after };
        }
        if status == StatusCode::NOT_FOUND {
            return RestClientError::NotFound(url);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return RestClientError::Http(e),
        };
        match serde_json::from_str::<ProblemDetails>(&text) {
            Ok(details) => RestClientError::ServerError { status, details },
            Err(_) => RestClientError::UnexpectedResponse { status, body: text },
        }
    }
}

/// Parses a `Retry-After` header given in delta-seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_adds_trailing_slash() {
        let client = RestClient::from_url("https://api.example.com/v2", AuthConfig::default()).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/v2/");

        let client = RestClient::from_url("https://api.example.com", AuthConfig::default()).unwrap();
        assert_eq!(client.base_url().as_str(), "https://api.example.com/");
    }

    #[test]
    fn test_parameters_url_building() {
        let client = RestClient::from_url("https://api.example.com/v2/", AuthConfig::default()).unwrap();

        let url = client
            .parameters_url("head_2.0", "bust/mobile", ParametersSubset::All)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/parameters/available/head_2.0/?pipeline_subtype=bust%2Fmobile"
        );

        let url = client
            .parameters_url("animated_face", "", ParametersSubset::Default)
            .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/parameters/default/animated_face/");
    }

    #[test]
    fn test_create_avatar_body_encodes_photo() {
        let request = CreateAvatarRequest {
            name: "avatar".into(),
            description: String::new(),
            pipeline: "head_2.0".into(),
            pipeline_subtype: "bust/mobile".into(),
            parameters: None,
            source: PhotoSource::Photo(b"jpeg".to_vec()),
        };
        let body = serde_json::to_value(CreateAvatarBody::from_request(&request)).unwrap();

        assert_eq!(body["photo"], "anBlZw==");
        assert!(body.get("selfie_code").is_none());
        assert!(body.get("description").is_none());
    }

    #[test]
    fn test_create_avatar_body_with_selfie() {
        let request = CreateAvatarRequest {
            name: "avatar".into(),
            description: "from selfie".into(),
            pipeline: "body_0.3".into(),
            pipeline_subtype: "female".into(),
            parameters: Some(ComputationParameters::default()),
            source: PhotoSource::Selfie("selfie-1".into()),
        };
        let body = serde_json::to_value(CreateAvatarBody::from_request(&request)).unwrap();

        assert_eq!(body["selfie_code"], "selfie-1");
        assert!(body.get("photo").is_none());
        assert_eq!(body["parameters"], serde_json::json!({}));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_create_avatar_rejects_invalid_request_before_sending() {
        let client = RestClient::from_url("http://127.0.0.1:9", AuthConfig::default()).unwrap();
        let request = CreateAvatarRequest {
            name: String::new(),
            description: String::new(),
            pipeline: "head_2.0".into(),
            pipeline_subtype: String::new(),
            parameters: None,
            source: PhotoSource::Photo(vec![1]),
        };

        let err = client.create_avatar(&request).await.unwrap_err();
        assert!(matches!(err, RestClientError::ApiContract(_)));
    }
}
