//! Service operations and their caches, exercised through the mock client.

use av_client_api::ClientApiError;
use av_core::{
    Artifact, AvatarProvider, CoreConfig, Error, FailurePolicy, FsStorage, PersistentStorage,
    PipelineKind,
};
use av_rest_api_contract::{AvatarStatus, CreateAvatarRequest, ParametersSubset, PhotoSource};
use av_rest_client_mock::{MockClient, Operation};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn provider(mock: &Arc<MockClient>, config: CoreConfig) -> (TempDir, AvatarProvider) {
    let dir = TempDir::new().expect("Failed to create storage directory");
    let storage: Arc<dyn PersistentStorage> = Arc::new(FsStorage::new(dir.path()));
    let provider = AvatarProvider::new(mock.clone(), storage, config);
    (dir, provider)
}

fn fast_config() -> CoreConfig {
    CoreConfig {
        poll_interval_ms: 1,
        ..CoreConfig::default()
    }
}

fn create_request(source: PhotoSource) -> CreateAvatarRequest {
    CreateAvatarRequest {
        name: "provider test".into(),
        description: String::new(),
        pipeline: "head_2.0".into(),
        pipeline_subtype: "bust/mobile".into(),
        parameters: None,
        source,
    }
}

async fn computed_avatar(provider: &AvatarProvider) -> String {
    let code = provider
        .initialize_avatar(
            PipelineKind::Head20BustMobile,
            create_request(PhotoSource::Photo(b"photo".to_vec())),
        )
        .wait()
        .await
        .unwrap();
    provider.await_calculations(&code).wait().await.unwrap();
    code
}

#[tokio::test]
async fn test_concurrent_parameter_requests_share_one_call() {
    let mock = Arc::new(MockClient::new().with_latency(Duration::from_millis(10)));
    let (_dir, provider) = provider(&mock, fast_config());

    let first = provider.get_parameters(PipelineKind::UmaMale, ParametersSubset::All);
    let second = provider.get_parameters(PipelineKind::UmaMale, ParametersSubset::All);

    assert!(first.ptr_eq(&second));
    assert_eq!(first.wait().await, second.wait().await);
    assert_eq!(mock.calls(Operation::GetParameters), 1);
}

#[tokio::test]
async fn test_failed_parameters_are_evicted_by_default() {
    let mock = Arc::new(MockClient::new().failing(
        Operation::GetParameters,
        1,
        ClientApiError::Server("busy".into()),
    ));
    let (_dir, provider) = provider(&mock, fast_config());

    let failed = provider.get_parameters(PipelineKind::Face, ParametersSubset::Default);
    assert!(failed.wait().await.is_err());

    let retried = provider.get_parameters(PipelineKind::Face, ParametersSubset::Default);
    assert!(retried.wait().await.is_ok());
    assert_eq!(mock.calls(Operation::GetParameters), 2);
}

#[tokio::test]
async fn test_failed_parameters_kept_when_configured() {
    let mock = Arc::new(MockClient::new().failing(
        Operation::GetParameters,
        1,
        ClientApiError::Server("busy".into()),
    ));
    let config = CoreConfig {
        parameters_failure_policy: FailurePolicy::Keep,
        ..fast_config()
    };
    let (_dir, provider) = provider(&mock, config);

    let failed = provider.get_parameters(PipelineKind::Face, ParametersSubset::Default);
    assert!(failed.wait().await.is_err());

    let again = provider.get_parameters(PipelineKind::Face, ParametersSubset::Default);
    assert!(again.ptr_eq(&failed));
    assert_eq!(mock.calls(Operation::GetParameters), 1);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_upload() {
    let mock = Arc::new(MockClient::new());
    let (_dir, provider) = provider(&mock, fast_config());

    let result = provider
        .create_avatar(create_request(PhotoSource::Photo(Vec::new())))
        .wait()
        .await;

    assert!(matches!(result, Err(Error::InvalidRequest { .. })));
    assert_eq!(mock.calls(Operation::CreateAvatar), 0);
}

#[tokio::test]
async fn test_selfie_source_skips_local_photo() {
    let mock = Arc::new(MockClient::new());
    let (dir, provider) = provider(&mock, fast_config());

    let code = provider
        .initialize_avatar(
            PipelineKind::Head20BustMobile,
            create_request(PhotoSource::Selfie("selfie-1".into())),
        )
        .wait()
        .await
        .unwrap();

    let avatar_dir = dir.path().join("avatars").join(&code);
    assert!(!avatar_dir.join("photo.jpg").exists());
    assert_eq!(
        std::fs::read_to_string(avatar_dir.join("pipeline.txt")).unwrap(),
        "head20_bust_mobile"
    );
}

#[tokio::test]
async fn test_completed_avatar_record_is_cached() {
    let mock = Arc::new(MockClient::new());
    let (_dir, provider) = provider(&mock, fast_config());

    let code = computed_avatar(&provider).await;
    let polls = mock.calls(Operation::GetAvatar);

    let avatar = provider.get_avatar(&code).wait().await.unwrap();
    assert_eq!(avatar.status, AvatarStatus::Completed);
    provider.get_avatar(&code).wait().await.unwrap();
    assert_eq!(mock.calls(Operation::GetAvatar), polls);
}

#[tokio::test]
async fn test_incomplete_avatar_record_is_requested_again() {
    let mock = Arc::new(MockClient::new());
    let (_dir, provider) = provider(&mock, fast_config());

    let code = provider
        .initialize_avatar(
            PipelineKind::Head20BustMobile,
            create_request(PhotoSource::Photo(b"photo".to_vec())),
        )
        .wait()
        .await
        .unwrap();

    let queued = provider.get_avatar(&code).wait().await.unwrap();
    assert_eq!(queued.status, AvatarStatus::Queued);
    let computing = provider.get_avatar(&code).wait().await.unwrap();
    assert_eq!(computing.status, AvatarStatus::Computing);
    assert_eq!(mock.calls(Operation::GetAvatar), 2);
}

#[tokio::test]
async fn test_download_artifacts_into_lod_directory() {
    let mock = Arc::new(MockClient::new());
    let config = CoreConfig {
        detail_level: 2,
        ..fast_config()
    };
    let (dir, provider) = provider(&mock, config);

    let code = computed_avatar(&provider).await;
    let avatar = provider.get_avatar(&code).wait().await.unwrap();

    let mesh_dir = provider.download_artifact(&avatar, Artifact::Mesh).wait().await.unwrap();
    assert_eq!(mesh_dir, dir.path().join("avatars").join(&code).join("LOD2"));
    assert!(mesh_dir.join("model.ply").is_file());

    let texture = provider.download_artifact(&avatar, Artifact::Texture).wait().await.unwrap();
    assert_eq!(std::fs::read(texture).unwrap(), b"jpeg texture");
}

#[tokio::test]
async fn test_missing_artifact_url_fails() {
    let mock = Arc::new(MockClient::new());
    let (_dir, provider) = provider(&mock, fast_config());

    let created = provider
        .create_avatar(create_request(PhotoSource::Photo(b"photo".to_vec())))
        .wait()
        .await
        .unwrap();

    let result = provider.download_artifact(&created, Artifact::Mesh).wait().await;
    assert!(matches!(result, Err(Error::Task { .. })));
    assert_eq!(mock.calls(Operation::Download), 0);
}

#[tokio::test]
async fn test_haircut_ids_are_resolved_to_full_names() {
    let mock = Arc::new(MockClient::new().with_haircuts(vec!["generated".into(), "short_simple".into()]));
    let (_dir, provider) = provider(&mock, fast_config());
    let code = computed_avatar(&provider).await;

    let ids = provider
        .get_haircut_ids(&code, PipelineKind::Head20BustMobile)
        .wait()
        .await
        .unwrap();
    assert_eq!(ids, vec!["base/generated".to_string(), "base/short_simple".to_string()]);

    provider.get_haircuts(&code).wait().await.unwrap();
    assert_eq!(mock.calls(Operation::GetHaircuts), 1);
}

#[tokio::test]
async fn test_unknown_haircut_download_fails() {
    let mock = Arc::new(MockClient::new());
    let (_dir, provider) = provider(&mock, fast_config());
    let code = computed_avatar(&provider).await;

    let error = provider.download_haircut(&code, "plus/mohawk").wait().await.unwrap_err();
    assert_eq!(
        error.to_string(),
        format!("Task error: There is no plus/mohawk haircut for avatar with code: {}", code)
    );
}

#[tokio::test]
async fn test_cancelled_polling_stops() {
    let mock = Arc::new(MockClient::new().with_statuses(vec![AvatarStatus::Computing]));
    let (_dir, provider) = provider(&mock, fast_config());

    let code = provider
        .create_avatar(create_request(PhotoSource::Photo(b"photo".to_vec())))
        .wait()
        .await
        .unwrap()
        .code;

    let polling = provider.await_calculations(&code);
    tokio::time::sleep(Duration::from_millis(10)).await;
    polling.cancel();

    assert_eq!(polling.wait().await, Err(Error::Cancelled));
}
