//! Client side of the storage-node HTTP protocol
//!
//! - `GET  /health`                    liveness
//! - `GET  /files/{key}`               raw bytes (+ `Content-Disposition` filename)
//! - `POST /files?file_id={key}`       store a replica (multipart `file`)
//! - `POST /files`                     client upload, node assigns the key
//! - `DELETE /files/{key}`             200, or 404 when already absent

use crate::common::{content_disposition_filename, encode_key, node_url, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, multipart, Client, StatusCode};
use std::time::Duration;

/// A file pulled from a storage node
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Bytes,
    /// Original filename advertised by the node, if any
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The node did not have the file
    NotFound,
}

/// Operations the core needs from storage nodes.
///
/// Every call is bounded by a timeout; a hung node surfaces as
/// `Error::Unreachable`, a non-success reply as `Error::Upstream`.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Succeeds iff the node answers its health probe within `timeout`
    async fn probe(&self, address: &str, timeout: Duration) -> Result<()>;

    async fn fetch(&self, address: &str, file_key: &str) -> Result<FetchedFile>;

    async fn store(&self, address: &str, file_key: &str, filename: &str, bytes: Bytes)
        -> Result<()>;

    async fn delete(&self, address: &str, file_key: &str) -> Result<DeleteOutcome>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpNodeClient {
    client: Client,
    transfer_timeout: Duration,
    proxy_timeout: Duration,
    delete_timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(transfer_timeout: Duration, proxy_timeout: Duration, delete_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            transfer_timeout,
            proxy_timeout,
            delete_timeout,
        }
    }

    /// Forward a client upload to `{address}/files` and return the node's JSON reply.
    ///
    /// `body` is sent as it arrives; the node sees a chunked multipart part.
    pub async fn forward_upload(
        &self,
        address: &str,
        filename: &str,
        content_type: Option<&str>,
        body: reqwest::Body,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut part = multipart::Part::stream(body).file_name(filename.to_string());
        if let Some(ct) = content_type {
            part = part
                .mime_str(ct)
                .map_err(|e| Error::InvalidRequest(format!("bad content type: {}", e)))?;
        }
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(node_url(address, "files"))
            .multipart(form)
            .timeout(self.proxy_timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        if !response.status().is_success() {
            return Err(Error::Upstream {
                node: address.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<serde_json::Map<String, serde_json::Value>>()
            .await
            .map_err(|e| Error::Transfer(format!("invalid upload response from {}: {}", address, e)))
    }

    /// Open a streaming download; the caller forwards the body.
    ///
    /// A 404 from the node is `Error::NotFound`.
    pub async fn open_download(&self, address: &str, file_key: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(file_url(address, file_key))
            .timeout(self.proxy_timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::NotFound(file_key.to_string())),
            s => Err(Error::Upstream {
                node: address.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}

impl Default for HttpNodeClient {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }
}

#[async_trait]
impl NodeTransport for HttpNodeClient {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<()> {
        let response = self
            .client
            .get(node_url(address, "health"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(Error::Upstream {
                node: address.to_string(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn fetch(&self, address: &str, file_key: &str) -> Result<FetchedFile> {
        let response = self
            .client
            .get(file_url(address, file_key))
            .timeout(self.transfer_timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        if !response.status().is_success() {
            return Err(Error::Upstream {
                node: address.to_string(),
                status: response.status().as_u16(),
            });
        }

        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transfer(format!("reading {} from {}: {}", file_key, address, e)))?;

        Ok(FetchedFile { bytes, filename })
    }

    async fn store(
        &self,
        address: &str,
        file_key: &str,
        filename: &str,
        bytes: Bytes,
    ) -> Result<()> {
        let len = bytes.len() as u64;
        let part = multipart::Part::stream_with_length(bytes, len).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(node_url(address, &format!("files?file_id={}", encode_key(file_key))))
            .multipart(form)
            .timeout(self.transfer_timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Upstream {
                node: address.to_string(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn delete(&self, address: &str, file_key: &str) -> Result<DeleteOutcome> {
        let response = self
            .client
            .delete(file_url(address, file_key))
            .timeout(self.delete_timeout)
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;

        match response.status() {
            s if s.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            s => Err(Error::Upstream {
                node: address.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}

fn file_url(address: &str, file_key: &str) -> String {
    node_url(address, &format!("files/{}", encode_key(file_key)))
}

fn unreachable(address: &str, e: reqwest::Error) -> Error {
    let reason = if e.is_timeout() {
        "timed out".to_string()
    } else {
        e.to_string()
    };
    Error::Unreachable {
        node: address.to_string(),
        reason,
    }
}
