//! In-process mock of the unwrapping API for integration tests

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uv_unwrap_client::services::poll::TokioClock;
use uv_unwrap_client::services::retry::RetryPolicy;
use uv_unwrap_client::services::transport::HttpTransport;
use uv_unwrap_client::UnwrapClient;

pub const JOB_ID: &str = "job-7f3a";

/// Scripted server behaviour plus everything the server observed.
#[derive(Debug)]
pub struct MockState {
    /// Status payloads served in order; the last one repeats.
    pub statuses: VecDeque<Value>,
    pub upload_response: Value,
    pub artifact: Vec<u8>,
    /// Delay before each status response.
    pub status_delay: Duration,
    pub uploaded: Vec<(String, Vec<u8>)>,
    pub submitted: Vec<Value>,
    pub status_polls: usize,
    pub discovery_calls: usize,
}

impl MockState {
    pub fn new(statuses: Vec<Value>, artifact: Vec<u8>) -> Self {
        Self {
            statuses: statuses.into(),
            upload_response: json!({"file_id": "file-0001"}),
            artifact,
            status_delay: Duration::ZERO,
            uploaded: Vec::new(),
            submitted: Vec::new(),
            status_polls: 0,
            discovery_calls: 0,
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockServer {
    pub base_url: String,
    pub state: Shared,
}

impl MockServer {
    pub async fn start(state: MockState) -> Self {
        let state = Arc::new(Mutex::new(state));

        let app = Router::new()
            .route("/api/v1/system/status/", get(|| async { "OK" }))
            .route(
                "/api/v1/mesh-uv-unwrapping/available-models",
                get(available_models),
            )
            .route(
                "/api/v1/mesh-uv-unwrapping/supported-formats",
                get(supported_formats),
            )
            .route("/api/v1/mesh-uv-unwrapping/pack-methods", get(pack_methods))
            .route("/api/v1/file-upload/mesh", post(upload_mesh))
            .route("/api/v1/mesh-uv-unwrapping/unwrap-mesh", post(unwrap_mesh))
            .route("/api/v1/system/jobs/{job_id}", get(job_status))
            .route("/api/v1/system/jobs/{job_id}/download", get(download))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Mock server has no address");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock server error");
        });

        Self {
            base_url: format!("http://{addr}/api/v1"),
            state,
        }
    }

    pub fn client(&self) -> UnwrapClient<HttpTransport, TokioClock> {
        let transport = HttpTransport::new(&self.base_url, Duration::from_secs(10))
            .expect("Failed to build transport");
        UnwrapClient::new(transport, TokioClock::default()).with_retry_policy(RetryPolicy::none())
    }

    pub fn snapshot<R>(&self, read: impl FnOnce(&MockState) -> R) -> R {
        read(&self.state.lock().unwrap())
    }
}

async fn available_models(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().discovery_calls += 1;
    Json(json!({"models": [{"id": "partuv", "vram_requirement": 8192}]}))
}

async fn supported_formats(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().discovery_calls += 1;
    Json(json!({"input": ["obj", "glb"], "output": ["obj", "glb"]}))
}

async fn pack_methods(State(state): State<Shared>) -> Json<Value> {
    state.lock().unwrap().discovery_calls += 1;
    Json(json!({"pack_methods": ["blender", "none", "uvpackmaster"]}))
}

async fn upload_mesh(
    State(state): State<Shared>,
    mut multipart: Multipart,
) -> Result<Json<Value>, StatusCode> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

        let mut state = state.lock().unwrap();
        state.uploaded.push((file_name, data.to_vec()));
        return Ok(Json(state.upload_response.clone()));
    }
    Err(StatusCode::BAD_REQUEST)
}

async fn unwrap_mesh(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    state.lock().unwrap().submitted.push(body);
    Json(json!({"job_id": JOB_ID, "status": "queued"}))
}

async fn job_status(
    State(state): State<Shared>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if job_id != JOB_ID {
        return Err((StatusCode::NOT_FOUND, format!("unknown job {job_id}")));
    }
    let delay = state.lock().unwrap().status_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let mut state = state.lock().unwrap();
    state.status_polls += 1;
    let status = if state.statuses.len() > 1 {
        state.statuses.pop_front()
    } else {
        state.statuses.front().cloned()
    };
    status
        .map(Json)
        .ok_or((StatusCode::INTERNAL_SERVER_ERROR, String::new()))
}

async fn download(State(state): State<Shared>, Path(job_id): Path<String>) -> Result<Vec<u8>, StatusCode> {
    if job_id != JOB_ID {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(state.lock().unwrap().artifact.clone())
}
