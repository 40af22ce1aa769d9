use super::*;
use crate::config::RelayConfig;
use crate::error::ApiError;
use crate::packager::ZipPackager;
use crate::service::Collaborators;
use crate::test_helpers::{ScriptedResolver, payload};
use crate::transcoder::NoOpTranscoder;
use crate::types::Event;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY_LEN: usize = 32 * 1024;

/// Service over a scripted resolver and a wiremock origin
async fn create_test_service() -> (Arc<MediaRelay>, MockServer, TempDir) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/media/.+"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(BODY_LEN).to_vec()))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().to_path_buf();
    config.download.item_url_template = "https://items.test/{id}".into();
    config.cleanup.enabled = false;
    config.server.bind_address = "127.0.0.1:0".parse().unwrap();
    config.relay = RelayConfig {
        max_attempts: 2,
        backoff_base: Duration::from_millis(1),
        ..RelayConfig::default()
    };

    let collaborators = Collaborators {
        resolver: Arc::new(ScriptedResolver::new(server.uri())),
        transcoder: Arc::new(NoOpTranscoder),
        packager: Arc::new(ZipPackager),
    };
    let service = MediaRelay::with_collaborators(config, collaborators)
        .await
        .unwrap();
    (Arc::new(service), server, temp_dir)
}

fn router(service: &Arc<MediaRelay>) -> Router {
    create_router(service.clone(), service.get_config())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn bytes_of(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn json_of(response: Response<Body>) -> Value {
    serde_json::from_slice(&bytes_of(response).await).unwrap()
}

fn header_of<'a>(response: &'a Response<Body>, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Parse an SSE body into events, ignoring keep-alive comments
fn parse_sse(body: &[u8]) -> Vec<Event> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

#[tokio::test]
async fn test_root_banner() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert!(body["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["capabilities"]["resolver"], "scripted");
    assert_eq!(body["capabilities"]["can_trim"], false);
}

#[tokio::test]
async fn test_cors_enabled() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = router(&service).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_of(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
}

#[tokio::test]
async fn test_cors_disabled() {
    let (service, _server, _temp_dir) = create_test_service().await;
    let mut config = (*service.get_config()).clone();
    config.server.cors_enabled = false;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = create_router(service.clone(), Arc::new(config))
        .oneshot(request)
        .await
        .unwrap();

    assert!(
        !response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}

#[tokio::test]
async fn test_single_download_is_an_attachment() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json("/download", json!({ "url": "clip" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_of(&response, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(
        header_of(&response, header::CONTENT_LENGTH),
        BODY_LEN.to_string()
    );
    let disposition = header_of(&response, header::CONTENT_DISPOSITION).to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains("Title_clip.mp4"));
    assert_eq!(bytes_of(response).await, payload(BODY_LEN).to_vec());
}

#[tokio::test]
async fn test_single_download_validation_error() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json("/download", json!({ "url": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let api_error: ApiError = serde_json::from_value(json_of(response).await).unwrap();
    assert_eq!(api_error.error.code, "invalid_request");
}

#[tokio::test]
async fn test_single_download_upstream_failure() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json("/download", json!({ "url": "gone" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_of(response).await;
    assert_eq!(body["error"]["code"], "upstream_http_error");
    assert_eq!(body["error"]["details"]["upstream_status"], 404);
}

#[tokio::test]
async fn test_trim_without_transcoder_is_not_implemented() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json(
            "/download",
            json!({ "url": "clip", "start_time": "00:00:10", "end_time": "00:00:20" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_playlist_streams_events_and_archive_is_retrievable() {
    let (service, _server, _temp_dir) = create_test_service().await;
    let app = router(&service);

    let response = app
        .clone()
        .oneshot(post_json(
            "/downloadplaylist",
            json!({
                "url": "https://items.test/list",
                "video_ids": ["a", "gone", "c"],
                "playlist_title": "Mix Tape"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header_of(&response, header::CONTENT_TYPE).starts_with("text/event-stream"));

    let events = parse_sse(&bytes_of(response).await);
    let finished = events
        .iter()
        .filter(|e| matches!(e, Event::VideoFinished { .. }))
        .count();
    let job_errors = events
        .iter()
        .filter(|e| matches!(e, Event::Error { video_index: Some(_), .. }))
        .count();
    assert_eq!((finished, job_errors), (2, 1));

    let zip_url = match events.last() {
        Some(Event::Completed {
            zip_url,
            archive_name,
            ..
        }) => {
            assert_eq!(archive_name, "Mix_Tape.zip");
            zip_url.clone()
        }
        other => panic!("expected completed as last event, got {other:?}"),
    };

    let first = app.clone().oneshot(get(&zip_url)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_of(&first, header::CONTENT_TYPE), "application/zip");
    let first = bytes_of(first).await;

    let second = bytes_of(app.oneshot(get(&zip_url)).await.unwrap()).await;
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_playlist_rejects_empty_video_ids() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json(
            "/downloadplaylist",
            json!({ "url": "https://items.test/list", "video_ids": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_playlist_rejects_escaping_download_path() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json(
            "/downloadplaylist",
            json!({ "video_ids": ["a"], "download_path": "../outside" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_playlist_rejects_working_directory_names_in_download_path() {
    let (service, _server, temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(post_json(
            "/downloadplaylist",
            json!({ "video_ids": ["a"], "download_path": "tmpmusic" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!temp_dir.path().join("tmpmusic").exists());
}

#[tokio::test]
async fn test_retrieval_hides_working_directories_and_partial_files() {
    let (service, _server, temp_dir) = create_test_service().await;
    let working = temp_dir.path().join("tmpab12");
    std::fs::create_dir_all(&working).unwrap();
    std::fs::write(working.join("item.mp4"), b"in progress").unwrap();
    std::fs::write(temp_dir.path().join("kept.zip.part"), b"half").unwrap();
    let app = router(&service);

    for uri in ["/download/tmpab12/item.mp4", "/download/kept.zip.part"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_retrieval_is_confined_to_the_download_root() {
    let (service, _server, temp_dir) = create_test_service().await;
    std::fs::write(temp_dir.path().join("kept.zip"), b"archive").unwrap();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
    let app = router(&service);

    let served = app.clone().oneshot(get("/download/kept.zip")).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert!(header_of(&served, header::CONTENT_DISPOSITION).contains("kept.zip"));
    assert_eq!(bytes_of(served).await, b"archive");

    for uri in [
        "/download/missing.zip".to_string(),
        "/download/../secret.txt".to_string(),
        format!("/download/{}", outside.path().join("secret.txt").display()),
    ] {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_openapi_endpoint() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let response = router(&service)
        .oneshot(get("/openapi.json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert!(body["paths"]["/downloadplaylist"].is_object());
}

#[tokio::test]
async fn test_requests_after_shutdown_are_unavailable() {
    let (service, _server, _temp_dir) = create_test_service().await;
    service.shutdown().await.unwrap();

    let response = router(&service)
        .oneshot(post_json("/downloadplaylist", json!({ "video_ids": ["a"] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_spawned_server_stops_on_shutdown() {
    let (service, _server, _temp_dir) = create_test_service().await;

    let api_handle = service.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), api_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
