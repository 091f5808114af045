//! HTTP client for the naming service's operator endpoints

use crate::common::{encode_key, node_url, Error, Result};
use crate::coordinator::metadata::{Node, QueueSummary, ReplicationQueueItem, ReplicationStatus};
use crate::coordinator::monitor::NodeCheck;
use crate::coordinator::replication::RecoveryReport;
use crate::coordinator::service::{DeleteReport, FileListing};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Clone)]
pub struct NamingClient {
    base_url: String,
    http: Client,
}

impl NamingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
        }
    }

    pub async fn nodes(&self) -> Result<Vec<Node>> {
        self.send(self.http.get(self.url("nodes"))).await
    }

    pub async fn check_nodes(&self) -> Result<Vec<NodeCheck>> {
        self.send(self.http.get(self.url("nodes/check"))).await
    }

    pub async fn files(&self) -> Result<Vec<FileListing>> {
        self.send(self.http.get(self.url("files"))).await
    }

    pub async fn recover(&self, node_id: &str) -> Result<RecoveryReport> {
        let url = self.url(&format!("nodes/{}/recover", encode_key(node_id)));
        // a pass over a full batch can take several transfer timeouts
        self.send(self.http.post(url).timeout(Duration::from_secs(600)))
            .await
    }

    pub async fn queue(
        &self,
        node_id: Option<&str>,
        status: Option<ReplicationStatus>,
    ) -> Result<Vec<ReplicationQueueItem>> {
        let mut query = Vec::new();
        if let Some(node) = node_id {
            query.push(("node_id", node.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        self.send(self.http.get(self.url("replication-queue")).query(&query))
            .await
    }

    /// Queue counts over every item, not just the listing window
    pub async fn queue_summary(&self) -> Result<QueueSummary> {
        self.send(self.http.get(self.url("replication-queue/summary")))
            .await
    }

    /// Reset FAILED items to PENDING; returns how many were reset
    pub async fn retry(&self, node_id: Option<&str>) -> Result<usize> {
        let mut req = self.http.post(self.url("replication-queue/retry"));
        if let Some(node) = node_id {
            req = req.query(&[("node_id", node)]);
        }
        let body: serde_json::Value = self.send(req).await?;
        Ok(body["reset"].as_u64().unwrap_or(0) as usize)
    }

    pub async fn delete(&self, file_key: &str) -> Result<DeleteReport> {
        let url = self.url(&format!("files/{}", encode_key(file_key)));
        self.send(self.http.delete(url)).await
    }

    fn url(&self, path: &str) -> String {
        node_url(&self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = req.send().await.map_err(|e| Error::Unreachable {
            node: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(Error::Other(format!("{} ({})", message, status.as_u16())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Other(format!("invalid response from naming service: {}", e)))
    }
}
