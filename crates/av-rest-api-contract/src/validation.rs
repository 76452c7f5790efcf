//! Validation helpers for API contract types

use crate::error::ApiContractError;
use crate::types::*;
use validator::Validate;

/// Validate an avatar creation request
pub fn validate_create_avatar_request(request: &CreateAvatarRequest) -> Result<(), ApiContractError> {
    request.validate()?;

    match &request.source {
        PhotoSource::Photo(bytes) if bytes.is_empty() => Err(
            ApiContractError::InvalidPhotoSource("photo bytes are empty".to_string()),
        ),
        PhotoSource::Selfie(code) if code.trim().is_empty() => Err(
            ApiContractError::InvalidPhotoSource("selfie code is empty".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Validate URL format
pub fn validate_url(url_str: &str) -> Result<(), ApiContractError> {
    url::Url::parse(url_str)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: PhotoSource) -> CreateAvatarRequest {
        CreateAvatarRequest {
            name: "test_avatar".to_string(),
            description: String::new(),
            pipeline: "head_2.0".to_string(),
            pipeline_subtype: "bust/mobile".to_string(),
            parameters: None,
            source,
        }
    }

    #[test]
    fn test_validate_create_avatar_request_valid() {
        assert!(validate_create_avatar_request(&request(PhotoSource::Photo(vec![1, 2, 3]))).is_ok());
        assert!(validate_create_avatar_request(&request(PhotoSource::Selfie("s1".into()))).is_ok());
    }

    #[test]
    fn test_validate_create_avatar_request_rejects_empty_sources() {
        let err = validate_create_avatar_request(&request(PhotoSource::Photo(Vec::new())));
        assert!(matches!(err, Err(ApiContractError::InvalidPhotoSource(_))));

        let err = validate_create_avatar_request(&request(PhotoSource::Selfie("  ".into())));
        assert!(matches!(err, Err(ApiContractError::InvalidPhotoSource(_))));
    }

    #[test]
    fn test_validate_create_avatar_request_rejects_empty_name() {
        let mut invalid = request(PhotoSource::Photo(vec![1]));
        invalid.name = String::new();
        assert!(matches!(
            validate_create_avatar_request(&invalid),
            Err(ApiContractError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://api.example.com/avatars/").is_ok());
        assert!(validate_url("not a url").is_err());
    }
}
