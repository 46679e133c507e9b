//! Functional tests for the generate and health routes

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use image::{DynamicImage, GenericImageView, RgbImage};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tower::ServiceExt;
use txt2img_serving::{
    api::routes::create_router,
    config::Settings,
    pipeline::{GenerationParams, StubPipeline, TextToImage},
    response::decode_png,
    AppError, AppState, Result,
};

/// Records every call's parameters and wall-clock interval
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<GenerationParams>>>,
    intervals: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

struct RecordingPipeline {
    delay: Duration,
    recorder: Recorder,
}

impl TextToImage for RecordingPipeline {
    fn name(&self) -> &str {
        "recording"
    }

    fn generate(&mut self, params: &GenerationParams) -> Result<DynamicImage> {
        let start = Instant::now();
        std::thread::sleep(self.delay);
        self.recorder.calls.lock().push(params.clone());
        self.recorder.intervals.lock().push((start, Instant::now()));
        Ok(DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }
}

/// Signals when inference starts, then blocks until released
struct GatedPipeline {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl TextToImage for GatedPipeline {
    fn name(&self) -> &str {
        "gated"
    }

    fn generate(&mut self, _params: &GenerationParams) -> Result<DynamicImage> {
        let _ = self.started.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        Ok(DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }
}

struct FailingPipeline;

impl TextToImage for FailingPipeline {
    fn name(&self) -> &str {
        "failing"
    }

    fn generate(&mut self, _params: &GenerationParams) -> Result<DynamicImage> {
        Err(AppError::Inference("CUDA out of memory".to_string()))
    }
}

fn app_with(pipeline: Box<dyn TextToImage>) -> Router {
    create_router(Arc::new(AppState::new(Settings::default(), pipeline)))
}

fn stub_app() -> Router {
    app_with(Box::new(StubPipeline::new(512, 512, Duration::ZERO)))
}

fn generate_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn health_request() -> Request<Body> {
    Request::builder().uri("/health").body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_generate_returns_png() {
    let response = stub_app()
        .oneshot(generate_request(r#"{"prompt": "a castle courtyard"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let encoded = body["image_base64"].as_str().unwrap();

    let image = decode_png(encoded).unwrap();
    assert_eq!(image.dimensions(), (512, 512));
    assert!(image.to_rgb8().pixels().all(|p| p.0 == [0, 0, 0]));
}

#[tokio::test]
async fn test_generate_with_all_fields() {
    let response = stub_app()
        .oneshot(generate_request(
            r#"{"prompt": "a castle courtyard", "inference_steps": 50, "guidance_scale": 7.5, "max_sequence_length": 512}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_prompt_is_bad_request() {
    for body in [r#"{}"#, r#"{"prompt": ""}"#, r#"{"prompt": null, "inference_steps": 4}"#] {
        let response = stub_app().oneshot(generate_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Prompt is required"})
        );
    }
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let response = stub_app()
        .oneshot(generate_request("{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_non_object_body_is_bad_request() {
    for body in [r#"["a fox"]"#, r#""a fox""#, "42"] {
        let response = stub_app().oneshot(generate_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"error": "Invalid request: Request body must be a JSON object"})
        );
    }
}

#[tokio::test]
async fn test_odd_hyperparameters_still_generate() {
    let recorder = Recorder::default();
    let app = app_with(Box::new(RecordingPipeline {
        delay: Duration::ZERO,
        recorder: recorder.clone(),
    }));

    for body in [
        r#"{"prompt": "x", "inference_steps": 50.0}"#,
        r#"{"prompt": "x", "inference_steps": -1}"#,
        r#"{"prompt": "x", "guidance_scale": "7.5"}"#,
    ] {
        let response = app.clone().oneshot(generate_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "body: {}", body);
    }

    let steps: Vec<u32> = recorder
        .calls
        .lock()
        .iter()
        .map(|p| p.inference_steps)
        .collect();
    assert_eq!(steps, vec![50, 60, 60]);
    assert!(recorder.calls.lock().iter().all(|p| p.guidance_scale == 7.5));
}

#[tokio::test]
async fn test_missing_prompt_never_reaches_pipeline() {
    let recorder = Recorder::default();
    let app = app_with(Box::new(RecordingPipeline {
        delay: Duration::ZERO,
        recorder: recorder.clone(),
    }));

    let response = app.oneshot(generate_request(r#"{}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(recorder.calls.lock().is_empty());
}

#[tokio::test]
async fn test_defaults_reach_pipeline() {
    let recorder = Recorder::default();
    let app = app_with(Box::new(RecordingPipeline {
        delay: Duration::ZERO,
        recorder: recorder.clone(),
    }));

    let response = app
        .oneshot(generate_request(r#"{"prompt": "a fox", "inference_steps": 12}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = recorder.calls.lock();
    assert_eq!(
        calls.as_slice(),
        &[GenerationParams {
            prompt: "a fox".to_string(),
            inference_steps: 12,
            guidance_scale: 7.5,
            max_sequence_length: 512,
        }]
    );
}

#[tokio::test]
async fn test_pipeline_failure_is_server_error() {
    let response = app_with(Box::new(FailingPipeline))
        .oneshot(generate_request(r#"{"prompt": "a fox"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({"error": "Inference error: CUDA out of memory"})
    );
}

#[tokio::test]
async fn test_health_returns_ok() {
    let response = stub_app().oneshot(health_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generates_are_serialized() {
    let recorder = Recorder::default();
    let app = app_with(Box::new(RecordingPipeline {
        delay: Duration::from_millis(40),
        recorder: recorder.clone(),
    }));

    let requests = (0..4).map(|i| {
        let app = app.clone();
        async move {
            app.oneshot(generate_request(&format!(r#"{{"prompt": "image {}"}}"#, i)))
                .await
                .unwrap()
        }
    });
    let responses = futures::future::join_all(requests).await;
    assert!(responses.iter().all(|r| r.status() == StatusCode::OK));

    let mut intervals = recorder.intervals.lock().clone();
    assert_eq!(intervals.len(), 4);
    intervals.sort_by_key(|(start, _)| *start);
    for pair in intervals.windows(2) {
        assert!(pair[1].0 >= pair[0].1, "inference intervals overlap");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_unaffected_by_running_inference() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let app = app_with(Box::new(GatedPipeline {
        started: started_tx,
        release: release_rx,
    }));

    let generating = tokio::spawn(
        app.clone()
            .oneshot(generate_request(r#"{"prompt": "a slow painting"}"#)),
    );
    tokio::task::spawn_blocking(move || started_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("inference never started");

    // The lock is held right now; health must still answer promptly.
    let response = tokio::time::timeout(Duration::from_secs(1), app.clone().oneshot(health_request()))
        .await
        .expect("health check blocked by inference")
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!generating.is_finished());

    release_tx.send(()).unwrap();
    let response = generating.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
