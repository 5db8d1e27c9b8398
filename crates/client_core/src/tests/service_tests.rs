use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

#[derive(Debug, Clone, Default)]
struct CapturedUpload {
    fields: BTreeMap<String, String>,
    file_name: Option<String>,
    content_type: Option<String>,
    file_bytes: Vec<u8>,
}

#[derive(Clone, Default)]
struct MockState {
    uploads: Arc<Mutex<Vec<CapturedUpload>>>,
}

async fn capture(mut multipart: Multipart) -> CapturedUpload {
    let mut upload = CapturedUpload::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            upload.file_name = field.file_name().map(str::to_string);
            upload.content_type = field.content_type().map(str::to_string);
            upload.file_bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        } else {
            let value = field.text().await.unwrap_or_default();
            upload.fields.insert(name, value);
        }
    }
    upload
}

async fn handle_predict(
    State(state): State<MockState>,
    multipart: Multipart,
) -> impl IntoResponse {
    let upload = capture(multipart).await;
    let unloaded = upload.file_name.as_deref() == Some("unloaded.png");
    state.uploads.lock().await.push(upload);
    if unloaded {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "Model not loaded. Please train the model first." })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "predicted_class": "glioma",
            "confidence": 0.87,
            "probabilities": { "glioma": 0.87, "normal": 0.05, "meningioma": 0.08 }
        })),
    )
}

async fn handle_explain(
    State(state): State<MockState>,
    multipart: Multipart,
) -> impl IntoResponse {
    let upload = capture(multipart).await;
    let method = upload.fields.get("method").cloned().unwrap_or_default();
    let predicted_class = upload.fields.get("predicted_class").cloned();
    state.uploads.lock().await.push(upload);
    if method == "lime" {
        // Older service builds use the short field name.
        return Json(json!({
            "method": method,
            "predicted_class": predicted_class,
            "explanation_image": "bGltZQ=="
        }));
    }
    Json(json!({
        "method": method,
        "predicted_class": predicted_class,
        "explanation_image_base64": "Z3JhZGNhbQ=="
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "classes": ["glioma", "meningioma", "normal", "pituitary"]
    }))
}

async fn handle_broken_explain() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

async fn spawn_classifier_server(prefix: &str) -> anyhow::Result<(Url, MockState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = MockState::default();
    let api = Router::new()
        .route("/api/predict", post(handle_predict))
        .route("/api/explain", post(handle_explain))
        .route("/api/health", get(handle_health))
        .route("/broken/api/explain", post(handle_broken_explain))
        .with_state(state.clone());
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base_url = Url::parse(&format!("http://{addr}{prefix}"))?;
    Ok((base_url, state))
}

fn scan() -> UploadedFile {
    UploadedFile::new("scan.png", Some("image/png".into()), b"\x89PNG fake".to_vec())
}

#[tokio::test]
async fn predict_posts_file_and_method_as_multipart() {
    let (base_url, state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let prediction = service
        .predict(&scan(), ExplanationMethod::GradCam)
        .await
        .expect("predict");

    assert_eq!(prediction.predicted_class, "glioma");
    assert!((prediction.confidence - 0.87).abs() < f64::EPSILON);
    assert_eq!(prediction.probabilities.len(), 3);

    let uploads = state.uploads.lock().await;
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.file_name.as_deref(), Some("scan.png"));
    assert_eq!(upload.content_type.as_deref(), Some("image/png"));
    assert_eq!(upload.file_bytes, b"\x89PNG fake");
    assert_eq!(upload.fields.get("method").map(String::as_str), Some("gradcam"));
    assert!(!upload.fields.contains_key("predicted_class"));
}

#[tokio::test]
async fn explain_sends_predicted_class_hint() {
    let (base_url, state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let response = service
        .explain(&scan(), ExplanationMethod::Shap, Some("glioma"))
        .await
        .expect("explain");

    assert_eq!(response.explanation_image_base64.as_deref(), Some("Z3JhZGNhbQ=="));
    assert_eq!(response.predicted_class.as_deref(), Some("glioma"));
    let uploads = state.uploads.lock().await;
    assert_eq!(uploads[0].fields.get("method").map(String::as_str), Some("shap"));
    assert_eq!(
        uploads[0].fields.get("predicted_class").map(String::as_str),
        Some("glioma")
    );
}

#[tokio::test]
async fn explain_accepts_legacy_image_field() {
    let (base_url, _state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let response = service
        .explain(&scan(), ExplanationMethod::Lime, None)
        .await
        .expect("explain");

    assert!(response.explanation_image_base64.is_none());
    assert_eq!(response.into_image().expect("image"), "bGltZQ==");
}

#[tokio::test]
async fn error_status_surfaces_service_detail() {
    let (base_url, _state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");
    let file = UploadedFile::new("unloaded.png", Some("image/png".into()), b"png".to_vec());

    let err = service
        .predict(&file, ExplanationMethod::GradCam)
        .await
        .expect_err("service unavailable");

    assert!(matches!(err, ServiceError::Status { status: 503, .. }));
    assert_eq!(
        err.detail(),
        Some("Model not loaded. Please train the model first.")
    );
}

#[tokio::test]
async fn non_json_error_body_has_no_detail() {
    let (base_url, _state) = spawn_classifier_server("").await.expect("spawn server");
    let base_url = base_url.join("broken").expect("join");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let err = service
        .explain(&scan(), ExplanationMethod::GradCam, Some("glioma"))
        .await
        .expect_err("server error");

    assert!(matches!(err, ServiceError::Status { status: 500, detail: None }));
    assert_eq!(err.user_message("Error processing image"), "Error processing image");
}

#[tokio::test]
async fn capabilities_default_shap_to_available() {
    let (base_url, _state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let health = service.capabilities().await.expect("health");

    assert_eq!(health.status.as_deref(), Some("healthy"));
    assert_eq!(health.classes.len(), 4);
    assert!(health.shap_available);
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let (base_url, state) = spawn_classifier_server("/classifier")
        .await
        .expect("spawn server");
    assert!(!base_url.path().ends_with('/'));
    let service = HttpClassifierService::new(base_url, None).expect("client");
    assert_eq!(service.base_url().path(), "/classifier/");

    service
        .predict(&scan(), ExplanationMethod::Lime)
        .await
        .expect("predict through prefix");
    assert_eq!(state.uploads.lock().await.len(), 1);
}

#[tokio::test]
async fn missing_media_type_falls_back_to_octet_stream() {
    let (base_url, state) = spawn_classifier_server("").await.expect("spawn server");
    let service = HttpClassifierService::new(base_url, None).expect("client");
    let file = UploadedFile::new("dropped.webp", None, b"webp".to_vec());

    service
        .predict(&file, ExplanationMethod::GradCam)
        .await
        .expect("predict");

    let uploads = state.uploads.lock().await;
    assert_eq!(
        uploads[0].content_type.as_deref(),
        Some("application/octet-stream")
    );
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let base_url = Url::parse(&format!("http://{addr}")).expect("url");
    let service = HttpClassifierService::new(base_url, None).expect("client");

    let err = service.capabilities().await.expect_err("nothing listening");
    assert!(matches!(err, ServiceError::Transport(_)));
}

#[tokio::test]
async fn missing_service_is_unavailable() {
    let err = MissingClassifierService
        .predict(&scan(), ExplanationMethod::GradCam)
        .await
        .expect_err("missing");
    assert!(matches!(err, ServiceError::Unavailable));
}
