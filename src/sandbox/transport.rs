//! Network transport between a sandbox handle and its runner.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::protocol::ExecuteRequest;

/// Raw outcome of a failed exchange with a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request deadline elapsed before a response arrived.
    TimedOut,
    /// Connection refused, reset, DNS failure and so on.
    Failed(String),
    /// The runner answered with a non-success status.
    Status { status: u16, body: Vec<u8> },
}

/// Delivers an execution request to the runner at `address` and returns the
/// raw response body.
#[async_trait]
pub trait RunnerTransport: Send + Sync {
    async fn post(
        &self,
        address: SocketAddr,
        request: &ExecuteRequest,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

/// HTTP transport using `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunnerTransport for HttpTransport {
    async fn post(
        &self,
        address: SocketAddr,
        request: &ExecuteRequest,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let url = format!("http://{address}/");
        trace!(%url, deadline_ms = %deadline.as_millis(), "Posting job to runner");

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(deadline)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.to_vec(),
            });
        }

        Ok(body.to_vec())
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::TimedOut
    } else {
        TransportError::Failed(error.to_string())
    }
}
