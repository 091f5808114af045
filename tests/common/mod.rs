//! Test harness: fake storage nodes and an in-process naming service

#![allow(dead_code)]

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use minidfs::common::{CoordinatorConfig, NodeRole, NodeSeed};
use minidfs::{Coordinator, NamingService};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct NodeState {
    healthy: AtomicBool,
    next_key: AtomicU64,
    /// key → (bytes, filename)
    files: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

/// A storage node speaking the health/transfer protocol on an ephemeral port
pub struct FakeNode {
    pub id: String,
    pub address: String,
    state: Arc<NodeState>,
    shutdown: Arc<Notify>,
}

impl FakeNode {
    pub async fn start(id: &str) -> Self {
        let state = Arc::new(NodeState::default());
        state.healthy.store(true, Ordering::SeqCst);

        let app = Router::new()
            .route("/health", get(health))
            .route("/files", axum::routing::post(store))
            .route("/files/:key", get(fetch).delete(remove))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await
                .unwrap();
        });

        Self {
            id: id.to_string(),
            address,
            state,
            shutdown,
        }
    }

    pub fn seed(&self, role: NodeRole) -> NodeSeed {
        NodeSeed {
            id: self.id.clone(),
            address: self.address.clone(),
            role,
        }
    }

    /// `/health` answers 503 while file endpoints keep working
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Stop accepting connections and close idle ones
    pub async fn kill(&self) {
        self.shutdown.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    pub fn put(&self, key: &str, data: &[u8], filename: &str) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), filename.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.state.files.lock().unwrap().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

async fn health(State(state): State<Arc<NodeState>>) -> StatusCode {
    if state.healthy.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn store(
    State(state): State<Arc<NodeState>>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let data = field.bytes().await.unwrap().to_vec();
        let key = query.get("file_id").cloned().unwrap_or_else(|| {
            format!("key-{}", state.next_key.fetch_add(1, Ordering::SeqCst))
        });
        let size = data.len();
        state
            .files
            .lock()
            .unwrap()
            .insert(key.clone(), (data, filename.clone()));
        return Json(json!({
            "success": true,
            "file_key": key,
            "original_filename": filename,
            "size_bytes": size,
        }))
        .into_response();
    }
    StatusCode::BAD_REQUEST.into_response()
}

async fn fetch(State(state): State<Arc<NodeState>>, Path(key): Path<String>) -> Response {
    match state.files.lock().unwrap().get(&key).cloned() {
        Some((data, filename)) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename),
                ),
            ],
            data,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn remove(State(state): State<Arc<NodeState>>, Path(key): Path<String>) -> StatusCode {
    match state.files.lock().unwrap().remove(&key) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

/// Naming service served on an ephemeral port
pub struct Naming {
    pub url: String,
    pub service: Arc<NamingService>,
    pub http: reqwest::Client,
    _dir: TempDir,
    _handle: JoinHandle<()>,
}

impl Naming {
    pub async fn start(nodes: Vec<NodeSeed>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            db_path: dir.path().join("naming-data"),
            probe_timeout_ms: 500,
            transfer_timeout_secs: 5,
            proxy_timeout_secs: 5,
            delete_timeout_secs: 2,
            nodes,
            ..Default::default()
        };

        let (service, router) = Coordinator::new(config).build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            url,
            service,
            http: reqwest::Client::new(),
            _dir: dir,
            _handle: handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// One monitor cycle, as the background task would run it
    pub async fn tick(&self) {
        self.service.monitor().run_cycle().await;
    }

    /// What the accepting node posts after an upload
    pub async fn register(&self, key: &str, holder: &str, failed: &[&str]) {
        let resp = self
            .http
            .post(self.url("/files/register"))
            .json(&json!({
                "file_key": key,
                "original_filename": format!("{}.txt", key),
                "size_bytes": 5,
                "checksum_sha256": "00ff",
                "node_id": holder,
                "failed_nodes": failed,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    pub async fn locations(&self, key: &str) -> Vec<String> {
        let body: serde_json::Value = self
            .http
            .get(self.url(&format!("/files/{}/locations", key)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["locations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }
}
