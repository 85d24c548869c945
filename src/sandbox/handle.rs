//! Proxy for one running sandbox container.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use super::SandboxId;
use super::transport::{RunnerTransport, TransportError};
use super::workspace::SandboxWorkspace;
use crate::error::SandboxError;
use crate::job::JobRequest;
use crate::platform::PlatformContainer;
use crate::protocol::{ErrorBody, ExecutionResult};

/// A single-use sandbox: its identity, the platform container it owns, and
/// the address of the runner inside it.
///
/// A handle is owned by exactly one place at a time: the pool's idle queue
/// or the dispatch that claimed it. Teardown is guarded so the platform's
/// stop/remove calls happen at most once.
pub struct SandboxHandle {
    id: SandboxId,
    container: Box<dyn PlatformContainer>,
    workspace: Option<SandboxWorkspace>,
    address: Option<SocketAddr>,
    provisioned_at: DateTime<Utc>,
    torn_down: bool,
}

impl SandboxHandle {
    /// Wraps a freshly created container. The address is assigned later.
    #[must_use]
    pub fn new(
        id: SandboxId,
        container: Box<dyn PlatformContainer>,
        workspace: Option<SandboxWorkspace>,
    ) -> Self {
        Self {
            id,
            container,
            workspace,
            address: None,
            provisioned_at: Utc::now(),
            torn_down: false,
        }
    }

    /// Sets the runner address.
    #[must_use]
    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub(crate) fn set_address(&mut self, address: SocketAddr) {
        self.address = Some(address);
    }

    /// Records the moment the sandbox became ready to serve.
    pub(crate) fn mark_ready(&mut self) {
        self.provisioned_at = Utc::now();
    }

    #[must_use]
    pub fn id(&self) -> SandboxId {
        self.id
    }

    /// Platform identifier of the underlying container.
    #[must_use]
    pub fn container_id(&self) -> &str {
        self.container.id()
    }

    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    #[must_use]
    pub fn provisioned_at(&self) -> DateTime<Utc> {
        self.provisioned_at
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub(crate) fn container(&self) -> &dyn PlatformContainer {
        self.container.as_ref()
    }

    /// Sends a job to the runner and returns one result per input.
    ///
    /// The request deadline is the job timeout plus `margin`. Hitting that
    /// deadline is not an error: it yields timed-out results, signalling that
    /// the sandbox is probably hung.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `SandboxError::NotProvisioned` if no address has been assigned
    /// - `SandboxError::UnreachableSandbox` on any other transport failure
    /// - `SandboxError::Rejected` if the runner answered with an error status
    /// - `SandboxError::MalformedResponse` if the body is empty or not a result list
    #[instrument(skip(self, transport, request), fields(sandbox = %self.id, language = %request.language))]
    pub async fn execute_job(
        &self,
        transport: &dyn RunnerTransport,
        request: &JobRequest,
        margin: Duration,
    ) -> Result<Vec<ExecutionResult>, SandboxError> {
        let address = self.address.ok_or_else(|| SandboxError::NotProvisioned {
            id: self.id.to_string(),
        })?;
        let deadline = request.timeout.saturating_add(margin);

        let body = match transport.post(address, &request.to_wire(), deadline).await {
            Ok(body) => body,
            Err(TransportError::TimedOut) => {
                warn!(deadline_ms = %deadline.as_millis(), "Runner did not answer before the deadline");
                let runs = request.inputs.len().max(1);
                return Ok(vec![ExecutionResult::transport_timeout(); runs]);
            }
            Err(TransportError::Failed(reason)) => {
                return Err(SandboxError::UnreachableSandbox { address, reason });
            }
            Err(TransportError::Status { status, body }) => {
                let message = serde_json::from_slice::<ErrorBody>(&body)
                    .map(|b| b.error)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
                return Err(SandboxError::Rejected { status, message });
            }
        };

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(SandboxError::MalformedResponse {
                address,
                reason: "empty response from container".to_string(),
            });
        }

        let results: Vec<ExecutionResult> =
            serde_json::from_slice(&body).map_err(|e| SandboxError::MalformedResponse {
                address,
                reason: e.to_string(),
            })?;

        debug!(runs = results.len(), "Runner returned results");
        Ok(results)
    }

    /// Stops and force-removes the container, then deletes the host working
    /// directory.
    ///
    /// Calling this again after it succeeded does nothing. A failed stop or
    /// remove is returned without retrying and leaves the handle not torn
    /// down.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::TeardownFailed` naming the failed operation.
    #[instrument(skip(self), fields(sandbox = %self.id))]
    pub async fn teardown(&mut self) -> Result<(), SandboxError> {
        if self.torn_down {
            return Ok(());
        }

        self.container
            .stop()
            .await
            .map_err(|source| SandboxError::TeardownFailed {
                operation: "stop",
                source,
            })?;

        self.container
            .remove(true)
            .await
            .map_err(|source| SandboxError::TeardownFailed {
                operation: "remove",
                source,
            })?;

        self.torn_down = true;

        if let Some(workspace) = &self.workspace {
            if let Err(e) = workspace.remove().await {
                warn!(error = %e, "Failed to remove sandbox workspace");
            }
        }

        debug!("Sandbox torn down");
        Ok(())
    }
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.id)
            .field("container", &self.container.id())
            .field("address", &self.address)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}
