//! Sandbox Pool - warm pools of single-use code execution containers.
//!
//! This crate runs untrusted code submissions in disposable containers. It
//! has two halves:
//!
//! - the [`pool`], which keeps a number of containers started and ready,
//!   binds each submitted job to exactly one of them, and replaces every
//!   container after a single use
//! - the [`runner`], a small HTTP service inside each container that writes
//!   the code to disk and runs it once per input through a language launcher
//!
//! # Platform Requirements
//!
//! - A reachable Docker daemon for the pool
//! - A Unix host inside the container for the runner (process groups)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sandbox_pool::job::JobRequest;
//! use sandbox_pool::pool::{PoolConfig, SandboxPool};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let pool = SandboxPool::docker(PoolConfig::default()).await?;
//!     pool.initialize(2).await?;
//!
//!     let request = JobRequest::new("print(input())", "python", Duration::from_secs(2))
//!         .with_inputs(["hello"]);
//!     for result in pool.run(request).wait().await? {
//!         print!("{}", result.stdout);
//!     }
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod job;
pub mod platform;
pub mod pool;
pub mod protocol;
pub mod runner;
pub mod sandbox;

// Re-export commonly used types
pub use error::{Error, Result};
pub use job::{Job, JobRequest, JobTicket};
pub use pool::{PoolConfig, SandboxPool};
pub use protocol::ExecutionResult;
pub use sandbox::SandboxHandle;
