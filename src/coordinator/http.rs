//! HTTP API for the naming service
//!
//! Client traffic (`/upload`, `/download/:key`, `DELETE /files/:key`) is routed
//! to a storage node chosen by the selector. Storage nodes call back into
//! `/files/register`; operators use the node, queue and recovery endpoints.
//!
//! Errors are returned as `{"error": "..."}` with 503 when no node can take
//! the request, 404 for unknown files/nodes, 502 for a failing storage node
//! and 500 for metadata errors.

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, Result, METRICS};
use crate::coordinator::metadata::{QueueFilter, ReplicationStatus};
use crate::coordinator::node_client::HttpNodeClient;
use crate::coordinator::service::{NamingService, RegisterFile};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest client upload accepted
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct CoordState {
    pub service: Arc<NamingService>,
    /// Streaming proxy client for uploads and downloads
    pub client: HttpNodeClient,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        // Nodes
        .route("/nodes", get(list_nodes))
        .route("/nodes/check", get(check_nodes))
        .route("/nodes/:node_id/recover", post(recover_node))
        // Files
        .route("/files", get(list_files))
        .route("/files/register", post(register_file))
        .route("/files/:file_key", axum::routing::delete(delete_file))
        .route("/files/:file_key/locations", get(file_locations))
        // Replication queue
        .route("/replication-queue", get(list_queue))
        .route("/replication-queue/summary", get(queue_summary))
        .route("/replication-queue/retry", post(retry_failed))
        // Routed client traffic
        .route(
            "/upload",
            post(upload)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES)),
        )
        .route("/download/:file_key", get(download))
        .route_layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "naming-service",
        "version": crate::VERSION,
    }))
}

/// Prometheus text: process metrics plus one line per node
async fn metrics(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    let mut out = METRICS.to_prometheus();
    let nodes = state.service.list_nodes()?;

    out.push_str("# HELP minidfs_node_up Node status (1 = UP)\n");
    out.push_str("# TYPE minidfs_node_up gauge\n");
    for node in &nodes {
        let _ = writeln!(
            out,
            "minidfs_node_up{{node_id=\"{}\",role=\"{}\"}} {}",
            node.id,
            node.role,
            u8::from(node.is_up())
        );
    }
    out.push_str("# HELP minidfs_node_latency_ms Last measured probe latency\n");
    out.push_str("# TYPE minidfs_node_latency_ms gauge\n");
    for node in &nodes {
        let _ = writeln!(
            out,
            "minidfs_node_latency_ms{{node_id=\"{}\"}} {}",
            node.id, node.latency_ms
        );
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    ))
}

async fn list_nodes(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.list_nodes()?))
}

async fn check_nodes(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.check_nodes().await?))
}

async fn recover_node(
    State(state): State<CoordState>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.recover(&node_id).await?))
}

async fn list_files(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.list_files()?))
}

async fn register_file(
    State(state): State<CoordState>,
    Json(req): Json<RegisterFile>,
) -> Result<impl IntoResponse> {
    state.service.register_file(req)?;
    Ok(Json(json!({
        "success": true,
        "message": "file metadata registered",
    })))
}

async fn file_locations(
    State(state): State<CoordState>,
    Path(file_key): Path<String>,
) -> Result<impl IntoResponse> {
    let locations = state.service.get_file_locations(&file_key)?;
    Ok(Json(json!({
        "file_key": file_key,
        "locations": locations,
    })))
}

async fn delete_file(
    State(state): State<CoordState>,
    Path(file_key): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.delete_file(&file_key).await?))
}

#[derive(Debug, Deserialize)]
struct QueueQuery {
    node_id: Option<String>,
    status: Option<String>,
}

async fn list_queue(
    State(state): State<CoordState>,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse> {
    let status = query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<ReplicationStatus>())
        .transpose()?;
    let filter = QueueFilter {
        node_id: query.node_id.filter(|n| !n.is_empty()),
        status,
    };
    Ok(Json(state.service.list_queue(&filter)?))
}

async fn queue_summary(State(state): State<CoordState>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.queue_summary()?))
}

#[derive(Debug, Deserialize)]
struct RetryQuery {
    node_id: Option<String>,
}

async fn retry_failed(
    State(state): State<CoordState>,
    Query(query): Query<RetryQuery>,
) -> Result<impl IntoResponse> {
    let reset = state.service.retry_failed(query.node_id.as_deref())?;
    Ok(Json(json!({ "reset": reset })))
}

/// Chunks buffered between the client upload and the node request
const UPLOAD_CHANNEL_DEPTH: usize = 8;

/// Stream a multipart upload to the selected node and decorate its reply
async fn upload(State(state): State<CoordState>, mut multipart: Multipart) -> Result<impl IntoResponse> {
    let mut field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| Error::InvalidRequest(format!("malformed multipart body: {}", e)))?
        {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(Error::InvalidRequest("missing multipart field 'file'".into())),
        }
    };
    let filename = field.file_name().unwrap_or("upload").to_string();
    let content_type = field.content_type().map(str::to_string);

    let nodes = state.service.list_nodes()?;
    let node = state
        .service
        .select_upload_target(&nodes)
        .ok_or(Error::NoAvailableNodes)?;

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);
    let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
    let forward = state
        .client
        .forward_upload(&node.address, &filename, content_type.as_deref(), body);

    let pump = async move {
        let mut size = 0u64;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    size += chunk.len() as u64;
                    // receiver gone: the node request already ended
                    if tx.send(Ok(chunk)).await.is_err() {
                        return Ok(size);
                    }
                }
                Ok(None) => return Ok(size),
                Err(e) => {
                    let reason = format!("reading upload: {}", e);
                    let _ = tx.send(Err(std::io::Error::other(reason.clone()))).await;
                    return Err(Error::InvalidRequest(reason));
                }
            }
        }
    };

    let (forwarded, pumped) = tokio::join!(forward, pump);
    // a broken client body is the client's fault, not the node's
    let size = pumped?;
    let mut reply = match forwarded {
        Ok(reply) => reply,
        Err(e) => {
            if e.marks_node_down() {
                state.service.mark_unreachable(&node.id);
            }
            return Err(e);
        }
    };

    METRICS.uploads_routed.inc();
    METRICS.bytes_proxied.add(size);
    tracing::info!(node_id = %node.id, filename = %filename, size, "Upload routed");

    reply.insert("routed_via".into(), json!("naming-service"));
    reply.insert("selected_node".into(), json!(node.id));
    reply.insert("node_latency_ms".into(), json!(node.latency_ms));
    Ok(Json(reply))
}

/// Stream a file from the lowest-latency UP holder
async fn download(
    State(state): State<CoordState>,
    Path(file_key): Path<String>,
) -> Result<Response> {
    let nodes = state.service.list_nodes()?;
    let node = state
        .service
        .select_download_target(&file_key, &nodes)?
        .ok_or_else(|| Error::NotFound(format!("no available node holds {}", file_key)))?;

    let upstream = match state.client.open_download(&node.address, &file_key).await {
        Ok(upstream) => upstream,
        Err(e) => {
            if e.marks_node_down() {
                state.service.mark_unreachable(&node.id);
            }
            return Err(e);
        }
    };

    let mut builder = Response::builder().status(StatusCode::OK);
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_DISPOSITION,
        header::CONTENT_LENGTH,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    builder = builder
        .header("X-Routed-From", node.id.as_str())
        .header("X-Node-Latency-Ms", node.latency_ms.to_string());

    METRICS.downloads_routed.inc();
    if let Some(len) = upstream.content_length() {
        METRICS.bytes_proxied.add(len);
    }
    tracing::info!(file_key = %file_key, node_id = %node.id, "Download routed");

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| Error::Internal(format!("building download response: {}", e)))
}
