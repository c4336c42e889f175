//! In-process stand-in for the conversion service.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const JOB_ID: &str = "abc";
pub const FILE_BODY: &[u8] = b"ID3\x03\x00fake-mp3-bytes";

#[derive(Default)]
pub struct FakeServer {
    /// Bodies returned by successive progress polls; the last one repeats.
    pub progress_script: Mutex<VecDeque<(StatusCode, Value)>>,
    pub progress_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub last_start_body: Mutex<Option<Value>>,
}

impl FakeServer {
    pub fn with_progress(script: Vec<(StatusCode, Value)>) -> Arc<Self> {
        Arc::new(Self {
            progress_script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }
}

/// Bind on an ephemeral port and return the base URL.
pub async fn spawn(state: Arc<FakeServer>) -> String {
    let app = Router::new()
        .route("/api/info", post(info))
        .route("/api/start_download", post(start_download))
        .route("/api/progress/:job_id", get(progress))
        .route("/api/get_file/:filename", get(get_file))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn info(Json(body): Json<Value>) -> Response {
    let url = body["url"].as_str().unwrap_or_default();
    if url.contains("unsupported") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "ERROR: Unsupported URL" })),
        )
            .into_response();
    }
    if url.contains("gateway") {
        return (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response();
    }
    Json(json!({
        "title": "Demo Clip",
        "uploader": "Someone",
        "duration": "3:25",
        "thumbnail": null,
    }))
    .into_response()
}

async fn start_download(State(state): State<Arc<FakeServer>>, Json(body): Json<Value>) -> Response {
    state.start_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_start_body.lock().unwrap() = Some(body.clone());
    if body["url"].as_str().map_or(true, |u| u.contains("private")) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid url" }))).into_response();
    }
    Json(json!({ "job_id": JOB_ID })).into_response()
}

async fn progress(State(state): State<Arc<FakeServer>>, Path(job_id): Path<String>) -> Response {
    state.progress_calls.fetch_add(1, Ordering::SeqCst);
    if job_id != JOB_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Job not found" }))).into_response();
    }
    let mut script = state.progress_script.lock().unwrap();
    let (status, body) = if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        script
            .front()
            .cloned()
            .unwrap_or((StatusCode::OK, json!({ "status": "downloading", "percent": "50%" })))
    };
    (status, Json(body)).into_response()
}

async fn get_file(Path(filename): Path<String>) -> Response {
    if filename.starts_with("missing") {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "File not found" }))).into_response();
    }
    FILE_BODY.to_vec().into_response()
}
