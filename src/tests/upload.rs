//! Upload and download endpoints against the in-memory engine

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

use super::fixtures::{FakeEngine, FakeLoader, CORRUPT};
use crate::config::ServerConfig;
use crate::http::create_router;
use crate::state::AppState;

const BOUNDARY: &str = "mp3-equalizer-test-boundary";

fn app() -> (Router, Arc<AppState>, Arc<FakeLoader>) {
    app_with(FakeLoader::new())
}

fn app_with(loader: Arc<FakeLoader>) -> (Router, Arc<AppState>, Arc<FakeLoader>) {
    let state = Arc::new(AppState::with_loader(
        ServerConfig::default(),
        loader.clone(),
    ));
    (create_router(state.clone()), state, loader)
}

/// multipart/form-data body with one `files` part per (name, type, data)
fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, media_type, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media_type).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(files: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload-mp3s")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(files)))
        .unwrap()
}

fn download_request() -> Request<Body> {
    Request::builder()
        .uri("/download-processed")
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_upload_then_download() {
    let (app, state, loader) = app();

    let response = app
        .clone()
        .oneshot(upload_request(&[
            ("a.mp3", "audio/mpeg", &b"first"[..]),
            ("b.mp3", "audio/mpeg", CORRUPT),
            ("c.mp3", "audio/mp3", &b"third"[..]),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["processed_count"], 2);
    assert_eq!(json["failed_count"], 1);
    assert_eq!(json["failures"][0]["name"], "b.mp3");
    assert_eq!(json["download_url"], "/download-processed");
    assert_eq!(loader.load_count(), 1);
    assert_eq!(state.progress().completed, 3);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["percent"], 100);
    assert_eq!(json["complete"], true);

    let response = app.oneshot(download_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    assert!(response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("equalized_mp3s.zip"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let zip = zip::ZipArchive::new(std::io::Cursor::new(body.to_vec())).unwrap();
    let mut names: Vec<&str> = zip.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["equalized_a.mp3", "equalized_c.mp3"]);
}

#[tokio::test]
async fn test_non_mp3_upload_rejected() {
    let (app, _state, loader) = app();

    let response = app
        .oneshot(upload_request(&[
            ("a.mp3", "audio/mpeg", &b"first"[..]),
            ("notes.txt", "text/plain", &b"hello"[..]),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["detail"], "File notes.txt is not an MP3 file");
    assert_eq!(loader.load_count(), 0);
}

#[tokio::test]
async fn test_empty_upload_rejected() {
    let (app, _state, _loader) = app();

    // A form field without a file attached
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload-mp3s")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], "No files uploaded");
}

#[tokio::test]
async fn test_all_failed_upload_is_unprocessable() {
    let (app, state, _loader) = app();

    let response = app
        .clone()
        .oneshot(upload_request(&[("good.mp3", "audio/mpeg", &b"fine"[..])]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.last_archive().is_some());

    let response = app
        .clone()
        .oneshot(upload_request(&[
            ("a.mp3", "audio/mpeg", CORRUPT),
            ("b.mp3", "audio/mpeg", CORRUPT),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await;
    assert_eq!(json["failures"].as_array().unwrap().len(), 2);
    assert!(state.last_archive().is_none());

    // The earlier batch's archive is not served for this one
    let response = app.oneshot(download_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_abandoned_upload_finishes_current_item_only() {
    let loader = FakeLoader::with(
        FakeEngine::with_run_time(Duration::from_millis(200)),
        0,
        Duration::ZERO,
    );
    let (app, state, loader) = app_with(loader);

    // Client disconnects while the first item is being processed
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        app.oneshot(upload_request(&[
            ("a.mp3", "audio/mpeg", &b"first"[..]),
            ("b.mp3", "audio/mpeg", &b"second"[..]),
            ("c.mp3", "audio/mpeg", &b"third"[..]),
        ])),
    )
    .await;
    assert!(abandoned.is_err());

    // The batch lock is held until the in-flight item has finished
    let _batch = state.batch_lock.lock().await;
    assert_eq!(loader.engine.runs.load(Ordering::SeqCst), 1);
    assert_eq!(loader.engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(state.progress().completed, 1);
    assert!(state.last_archive().is_none());

    let engine = state.engine.acquire().await.unwrap();
    assert!(engine.workspace().is_empty());
}
