//! Runs `VeoProvider` against an in-process mock of the Gemini REST API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use vidgen_core::{
    AspectRatio, FailureKind, Orchestrator, OrchestratorConfig, ProgressReporter, ProviderError,
    ReferenceImage, TaskOutcome, TaskRequest, VeoConfig, VeoProvider, VideoProvider,
};

const GOOD_KEY: &str = "good-key-0123456789abcdef";
const OPERATION: &str = "models/veo-2.0-generate-001/operations/op-123";
const VIDEO_BYTES: &[u8] = b"\0\0\0\x18ftypmp42 not really a video";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Generate,
    Filtered,
    OperationError,
    ServerError,
}

struct Mock {
    mode: Mode,
    polls_until_done: usize,
    polls: AtomicUsize,
    base_url: Mutex<String>,
    last_body: Mutex<Option<Value>>,
    last_action: Mutex<Option<String>>,
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-goog-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|k| k == GOOD_KEY)
}

async fn start(
    State(mock): State<Arc<Mock>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return api_error(StatusCode::FORBIDDEN, "API key not valid. Please pass a valid API key.");
    }
    if mock.mode == Mode::ServerError {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend unavailable");
    }

    *mock.last_action.lock().unwrap() = Some(action);
    *mock.last_body.lock().unwrap() = Some(body);
    Json(json!({ "name": OPERATION })).into_response()
}

async fn poll(
    State(mock): State<Arc<Mock>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return api_error(StatusCode::UNAUTHORIZED, "missing key");
    }
    assert_eq!(id, "op-123");

    let polls = mock.polls.fetch_add(1, Ordering::SeqCst) + 1;
    if polls < mock.polls_until_done {
        return Json(json!({ "name": OPERATION, "done": false })).into_response();
    }

    let body = match mock.mode {
        Mode::Generate => {
            let uri = format!("{}/files/video.mp4", mock.base_url.lock().unwrap());
            json!({
                "name": OPERATION,
                "done": true,
                "response": { "generateVideoResponse": {
                    "generatedSamples": [ { "video": { "uri": uri } } ]
                }}
            })
        }
        Mode::Filtered => json!({
            "name": OPERATION,
            "done": true,
            "response": { "generateVideoResponse": {
                "raiMediaFilteredCount": 1,
                "raiMediaFilteredReasons": ["The prompt could not be processed."]
            }}
        }),
        Mode::OperationError => json!({
            "name": OPERATION,
            "done": true,
            "error": { "code": 8, "message": "Resource has been exhausted." }
        }),
        Mode::ServerError => unreachable!("generation never starts"),
    };
    Json(body).into_response()
}

async fn video(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return api_error(StatusCode::FORBIDDEN, "missing key");
    }
    VIDEO_BYTES.into_response()
}

/// Serve the mock on an ephemeral port and return it with its API root.
async fn serve(mode: Mode, polls_until_done: usize) -> (Arc<Mock>, String) {
    let mock = Arc::new(Mock {
        mode,
        polls_until_done,
        polls: AtomicUsize::new(0),
        base_url: Mutex::new(String::new()),
        last_body: Mutex::new(None),
        last_action: Mutex::new(None),
    });

    let app = Router::new()
        .route("/v1beta/models/{action}", post(start))
        .route(
            "/v1beta/models/veo-2.0-generate-001/operations/{id}",
            get(poll),
        )
        .route("/v1beta/files/video.mp4", get(video))
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/v1beta", listener.local_addr().unwrap());
    *mock.base_url.lock().unwrap() = base.clone();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (mock, base)
}

fn provider(base_url: String, output_dir: Option<std::path::PathBuf>) -> VeoProvider {
    VeoProvider::new(VeoConfig {
        base_url,
        poll_interval: Duration::from_millis(10),
        output_dir,
        ..VeoConfig::default()
    })
    .unwrap()
}

fn request(key: &str) -> TaskRequest {
    TaskRequest::new("a cat on a skateboard", key).with_aspect_ratio(AspectRatio::Portrait)
}

#[tokio::test]
async fn generates_and_returns_content_uri() {
    let (mock, base) = serve(Mode::Generate, 3).await;
    let veo = provider(base.clone(), None);

    let (tx, mut rx) = mpsc::channel(16);
    let artifact = veo
        .generate(&request(GOOD_KEY), ProgressReporter::new(tx))
        .await
        .unwrap();

    assert_eq!(artifact.location, format!("{base}/files/video.mp4"));
    assert_eq!(mock.polls.load(Ordering::SeqCst), 3);
    assert_eq!(
        mock.last_action.lock().unwrap().as_deref(),
        Some("veo-2.0-generate-001:predictLongRunning")
    );

    let body = mock.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["instances"][0]["prompt"], "a cat on a skateboard");
    assert_eq!(body["parameters"]["aspectRatio"], "9:16");
    assert_eq!(body["parameters"]["sampleCount"], 1);

    let mut progress = Vec::new();
    while let Ok(m) = rx.try_recv() {
        progress.push(m);
    }
    assert_eq!(progress.first().map(String::as_str), Some("Submitting generation request..."));
    assert_eq!(progress.len(), 1 + 2, "one submit message plus one per pending poll");
}

#[tokio::test]
async fn sends_reference_image_inline() {
    let (mock, base) = serve(Mode::Generate, 1).await;
    let veo = provider(base, None);
    let image = ReferenceImage::from_bytes(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").unwrap();

    veo.generate(
        &request(GOOD_KEY).with_reference_image(image.clone()),
        ProgressReporter::detached(),
    )
    .await
    .unwrap();

    let body = mock.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["instances"][0]["image"]["mimeType"], "image/png");
    assert_eq!(
        body["instances"][0]["image"]["bytesBase64Encoded"],
        image.encoded_bytes()
    );
}

#[tokio::test]
async fn downloads_into_output_dir() {
    let (_mock, base) = serve(Mode::Generate, 1).await;
    let dir = std::env::temp_dir().join(format!("vidgen-veo-test-{}", std::process::id()));
    let veo = provider(base, Some(dir.clone()));

    let artifact = veo
        .generate(&request(GOOD_KEY), ProgressReporter::detached())
        .await
        .unwrap();

    let expected = dir.join("vidgen-op-123.mp4");
    assert_eq!(artifact.location, expected.display().to_string());
    assert_eq!(tokio::fs::read(&expected).await.unwrap(), VIDEO_BYTES);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn rejected_key_maps_to_unauthorized() {
    let (mock, base) = serve(Mode::Generate, 1).await;
    let veo = provider(base, None);

    let err = veo
        .generate(&request("wrong-key"), ProgressReporter::detached())
        .await
        .unwrap_err();

    match err {
        ProviderError::Unauthorized { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "API key not valid. Please pass a valid API key.");
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }
    assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_error_maps_to_status() {
    let (_mock, base) = serve(Mode::ServerError, 1).await;
    let veo = provider(base, None);

    let err = veo
        .generate(&request(GOOD_KEY), ProgressReporter::detached())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ProviderError::Status { status: 500, ref message } if message == "backend unavailable"),
        "{err:?}"
    );
}

#[tokio::test]
async fn safety_filter_is_a_generation_failure() {
    let (_mock, base) = serve(Mode::Filtered, 1).await;
    let veo = provider(base, None);

    let err = veo
        .generate(&request(GOOD_KEY), ProgressReporter::detached())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ProviderError::GenerationFailed { ref message } if message.contains("could not be processed")),
        "{err:?}"
    );
}

#[tokio::test]
async fn operation_error_surfaces_as_failed_outcome() {
    let (_mock, base) = serve(Mode::OperationError, 2).await;
    let orchestrator = Orchestrator::new(
        Arc::new(provider(base, None)),
        OrchestratorConfig::default(),
    );
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = orchestrator
        .submit(request(GOOD_KEY), cancel_rx)
        .unwrap()
        .outcome()
        .await;

    assert_eq!(
        outcome,
        TaskOutcome::Failure {
            kind: FailureKind::Provider,
            message: "video generation failed: Resource has been exhausted.".into()
        }
    );
}

#[tokio::test]
async fn orchestrated_generation_succeeds() {
    let (_mock, base) = serve(Mode::Generate, 2).await;
    let orchestrator = Orchestrator::new(
        Arc::new(provider(base.clone(), None)),
        OrchestratorConfig::default(),
    );
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = orchestrator
        .submit(request(GOOD_KEY), cancel_rx)
        .unwrap()
        .outcome()
        .await;

    assert_eq!(
        outcome,
        TaskOutcome::Success {
            artifact_location: format!("{base}/files/video.mp4")
        }
    );
}
