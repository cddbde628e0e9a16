//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so any HTTP library
//! (reqwest, hyper, ureq, ...) can sit underneath.

use crate::error::{SyncError, SyncResult};
use crate::transport::{PublishResponse, RemoteTransport};
use async_trait::async_trait;
use mutsync_codec::MutationRecord;
use parking_lot::RwLock;
use tracing::warn;

/// Content type of request and response bodies.
pub const CBOR_CONTENT_TYPE: &str = "application/cbor";

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// HTTP client abstraction.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    ///
    /// `Err` means no response was received (connection refused, reset,
    /// DNS failure, ...). Any status code is an `Ok`.
    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>)
        -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based remote transport.
///
/// Each record is POSTed as its CBOR envelope to
/// `{base_url}/mutations/{model_type}`. Status handling:
///
/// - `2xx`: success; a non-empty body is decoded as the echo record
/// - `408`, `429`, `5xx`, or no response: retryable failure
/// - anything else: non-retryable failure
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the URL records of a model type are posted to.
    pub fn endpoint(&self, model_type: &str) -> String {
        format!("{}/mutations/{}", self.base_url.trim_end_matches('/'), model_type)
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

#[async_trait]
impl<C: HttpClient> RemoteTransport for HttpTransport<C> {
    async fn publish(&self, record: &MutationRecord) -> SyncResult<PublishResponse> {
        if !self.client.is_healthy() {
            return Err(self.fail(SyncError::transport_retryable("HTTP client is unhealthy")));
        }

        let body = record.to_bytes()?;
        let url = self.endpoint(&record.model_type);
        let response = self
            .client
            .post(&url, CBOR_CONTENT_TYPE, body)
            .await
            .map_err(|e| self.fail(SyncError::transport_retryable(e)))?;

        match response.status {
            200..=299 => {
                *self.last_error.write() = None;
                if response.body.is_empty() {
                    return Ok(PublishResponse::accepted());
                }
                match MutationRecord::from_bytes(&response.body) {
                    Ok(echo) => Ok(PublishResponse::with_echo(echo)),
                    Err(err) => {
                        warn!(
                            url = %url,
                            mutation_id = %record.mutation_id,
                            error = %err,
                            "ignoring undecodable echo in publish response"
                        );
                        Ok(PublishResponse::accepted())
                    }
                }
            }
            408 | 429 | 500..=599 => Err(self.fail(SyncError::transport_retryable(format!(
                "HTTP {} from {url}",
                response.status
            )))),
            status => Err(self.fail(SyncError::transport_fatal(format!(
                "HTTP {status} from {url}"
            )))),
        }
    }
}
