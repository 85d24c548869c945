//! Sandbox handles: the orchestrator-side proxy for one container.
//!
//! A [`SandboxHandle`] owns one platform container and speaks the execution
//! protocol to the runner inside it through a [`RunnerTransport`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sandbox_pool::job::JobRequest;
//! use sandbox_pool::sandbox::{HttpTransport, SandboxHandle};
//!
//! # async fn demo(mut handle: SandboxHandle) -> Result<(), sandbox_pool::error::SandboxError> {
//! let transport = HttpTransport::new();
//! let request = JobRequest::new("echo hi", "bash", Duration::from_secs(2));
//!
//! let results = handle
//!     .execute_job(&transport, &request, Duration::from_millis(500))
//!     .await?;
//! println!("{}", results[0].stdout);
//!
//! handle.teardown().await?;
//! # Ok(())
//! # }
//! ```

mod handle;
mod transport;
mod workspace;

pub use handle::SandboxHandle;
pub use transport::{HttpTransport, RunnerTransport, TransportError};
pub use workspace::SandboxWorkspace;

/// Unique identifier of a sandbox.
pub type SandboxId = uuid::Uuid;
