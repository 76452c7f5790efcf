//! Authentication methods for the REST API client

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};

/// Authentication methods supported by the service
#[derive(Debug, Clone, Default)]
pub enum AuthMethod {
    /// OAuth access token (`Authorization: Bearer <token>`)
    Bearer(String),
    /// Static API key (`Authorization: ApiKey <key>`)
    ApiKey(String),
    /// No authentication
    #[default]
    None,
}

impl AuthMethod {
    /// Apply authentication headers to a request
    pub fn apply_to_headers(&self, headers: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        let value = match self {
            AuthMethod::Bearer(token) => format!("Bearer {}", token),
            AuthMethod::ApiKey(key) => format!("ApiKey {}", key),
            AuthMethod::None => return Ok(()),
        };
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value)?,
        );
        Ok(())
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }
}

/// Authentication configuration for the client
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Identifies the end user on whose behalf avatars are created
    pub player_uid: Option<String>,
}

impl AuthConfig {
    pub fn with_bearer(token: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::bearer(token),
            player_uid: None,
        }
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::api_key(key),
            player_uid: None,
        }
    }

    /// Scope requests to a player
    pub fn with_player_uid(mut self, player_uid: impl Into<String>) -> Self {
        self.player_uid = Some(player_uid.into());
        self
    }

    /// Get headers for this authentication configuration
    pub fn headers(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        self.method.apply_to_headers(&mut headers)?;

        if let Some(player_uid) = &self.player_uid {
            headers.insert(
                HeaderName::from_static("x-playeruid"),
                HeaderValue::from_str(player_uid)?,
            );
        }

        Ok(headers)
    }
}
