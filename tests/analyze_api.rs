//! End-to-end tests of the analyze endpoint with stub collaborators.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::DynamicImage;
use tokio::sync::Mutex;
use tower::ServiceExt;

use lookalike::config::Config;
use lookalike::embedder::FaceEmbedder;
use lookalike::error::MatchError;
use lookalike::publisher::{AnalysisRecord, ResultPublisher};
use lookalike::server::{create_app, AppState};
use lookalike::store::{ReferenceRecord, ReferenceStore};

const BOUNDARY: &str = "lookalike-test-boundary";

struct StubEmbedder {
    /// None means "no face in the image".
    result: Option<Vec<f32>>,
}

impl FaceEmbedder for StubEmbedder {
    fn embed(&mut self, _img: &DynamicImage) -> Result<Vec<f32>, MatchError> {
        self.result.clone().ok_or(MatchError::NoFaceDetected)
    }
}

struct MemoryStore {
    records: Vec<ReferenceRecord>,
}

#[async_trait]
impl ReferenceStore for MemoryStore {
    async fn count(&self) -> Result<u64, MatchError> {
        Ok(self.records.len() as u64)
    }

    async fn page(&self, offset: u64, limit: u64) -> Result<Vec<ReferenceRecord>, MatchError> {
        let start = (offset as usize).min(self.records.len());
        let end = (start + limit as usize).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    published: StdMutex<Vec<(String, serde_json::Value)>>,
    fail: bool,
}

#[async_trait]
impl ResultPublisher for RecordingPublisher {
    async fn upload_photo(&self, _data: &[u8], _content_type: &str) -> Result<String, MatchError> {
        if self.fail {
            return Err(MatchError::StoreUnavailable("bucket down".into()));
        }
        Ok("http://img/probe.png".to_string())
    }

    async fn publish(&self, user_id: &str, analysis: &AnalysisRecord) -> Result<(), MatchError> {
        if self.fail {
            return Err(MatchError::StoreUnavailable("table down".into()));
        }
        self.published
            .lock()
            .unwrap()
            .push((user_id.to_string(), serde_json::to_value(analysis).unwrap()));
        Ok(())
    }
}

fn record(name: &str, embedding: Vec<f32>) -> ReferenceRecord {
    ReferenceRecord {
        name: name.to_string(),
        embedding,
        image_url: format!("http://img/{name}"),
    }
}

fn test_app(
    records: Vec<ReferenceRecord>,
    embed: Option<Vec<f32>>,
    publisher: Arc<RecordingPublisher>,
) -> Router {
    let config = Config {
        chunk_size: 2,
        ..Config::default()
    };
    let state = Arc::new(AppState {
        config,
        store: Arc::new(MemoryStore { records }),
        publisher,
        embedder: Mutex::new(Box::new(StubEmbedder { result: embed })),
    });
    create_app(state)
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 130, 140]));
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn file_part(body: &mut Vec<u8>, content_type: &str, data: &[u8]) {
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"probe.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
}

fn text_part(body: &mut Vec<u8>, name: &str, value: &str) {
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
            .as_bytes(),
    );
}

fn close_body(body: &mut Vec<u8>) {
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
}

fn analyze_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ranked_results_round_trip() {
    let publisher = Arc::new(RecordingPublisher::default());
    let app = test_app(
        vec![record("A", vec![0.0, 0.0]), record("B", vec![3.0, 4.0])],
        Some(vec![0.0, 0.0]),
        publisher.clone(),
    );

    let mut body = Vec::new();
    file_part(&mut body, "image/png", &png_bytes());
    text_part(&mut body, "user_id", "u-42");
    close_body(&mut body);

    let response = app
        .oneshot(analyze_request("/analyze?num_results=2", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let value = json_body(response).await;
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["rank"], 1);
    assert_eq!(results[0]["name"], "A");
    assert_eq!(results[0]["similarity"].as_f64().unwrap(), 10.0);
    assert_eq!(results[1]["rank"], 2);
    assert_eq!(results[1]["name"], "B");
    assert_eq!(results[1]["similarity"].as_f64().unwrap(), 0.0);

    // The analysis envelope was persisted for the right user, with the
    // uploaded photo URL attached.
    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "u-42");
    assert_eq!(published[0].1["photo_url"], "http://img/probe.png");
    assert_eq!(published[0].1["results"][0]["name"], "A");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_face_is_a_client_error() {
    let app = test_app(
        vec![record("A", vec![0.0, 0.0])],
        None,
        Arc::new(RecordingPublisher::default()),
    );

    let mut body = Vec::new();
    file_part(&mut body, "image/png", &png_bytes());
    close_body(&mut body);

    let response = app.oneshot(analyze_request("/analyze", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let value = json_body(response).await;
    assert!(value["error"].as_str().unwrap().contains("no face"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_reference_set_yields_empty_results() {
    let app = test_app(
        vec![],
        Some(vec![0.0, 0.0]),
        Arc::new(RecordingPublisher::default()),
    );

    let mut body = Vec::new();
    file_part(&mut body, "image/png", &png_bytes());
    close_body(&mut body);

    let response = app.oneshot(analyze_request("/analyze", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let value = json_body(response).await;
    assert_eq!(value["results"].as_array().unwrap().len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_numeric_num_results_is_rejected() {
    let app = test_app(
        vec![record("A", vec![0.0, 0.0])],
        Some(vec![0.0, 0.0]),
        Arc::new(RecordingPublisher::default()),
    );

    let mut body = Vec::new();
    file_part(&mut body, "image/png", &png_bytes());
    close_body(&mut body);

    let response = app
        .oneshot(analyze_request("/analyze?num_results=three", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let value = json_body(response).await;
    assert!(value["error"].as_str().unwrap().contains("num_results"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_file_field_is_rejected() {
    let app = test_app(
        vec![record("A", vec![0.0, 0.0])],
        Some(vec![0.0, 0.0]),
        Arc::new(RecordingPublisher::default()),
    );

    let mut body = Vec::new();
    text_part(&mut body, "user_id", "u-1");
    close_body(&mut body);

    let response = app.oneshot(analyze_request("/analyze", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_image_upload_is_rejected() {
    let app = test_app(
        vec![record("A", vec![0.0, 0.0])],
        Some(vec![0.0, 0.0]),
        Arc::new(RecordingPublisher::default()),
    );

    let mut body = Vec::new();
    file_part(&mut body, "text/plain", b"not an image");
    close_body(&mut body);

    let response = app.oneshot(analyze_request("/analyze", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_failure_does_not_overturn_the_match() {
    let publisher = Arc::new(RecordingPublisher {
        fail: true,
        ..RecordingPublisher::default()
    });
    let app = test_app(
        vec![record("A", vec![0.0, 0.0]), record("B", vec![3.0, 4.0])],
        Some(vec![0.0, 0.0]),
        publisher,
    );

    let mut body = Vec::new();
    file_part(&mut body, "image/png", &png_bytes());
    close_body(&mut body);

    let response = app.oneshot(analyze_request("/analyze", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let value = json_body(response).await;
    assert_eq!(value["results"].as_array().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_endpoint_responds() {
    let app = test_app(vec![], None, Arc::new(RecordingPublisher::default()));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
