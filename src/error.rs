//! Error types for the sandbox pool.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use std::net::SocketAddr;

use miette::Diagnostic;
use thiserror::Error;

use crate::pool::ProvisionStage;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Pool orchestration error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Pool(#[from] PoolError),

    /// Sandbox handle error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    /// In-sandbox runner error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runner(#[from] RunnerError),

    /// Container platform error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Platform(#[from] PlatformError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(pool::io))]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the pool orchestrator, either from `initialize` or
/// through a job's completion.
#[derive(Error, Debug, Diagnostic)]
pub enum PoolError {
    /// Pool size must be at least one
    #[error("invalid pool size {size}")]
    #[diagnostic(code(pool::invalid_size), help("Start the pool with at least one sandbox"))]
    InvalidPoolSize { size: usize },

    /// A provisioning stage failed
    #[error("sandbox provisioning failed during {stage}")]
    #[diagnostic(code(pool::provisioning))]
    ProvisioningFailed {
        stage: ProvisionStage,
        #[source]
        source: SandboxError,
    },

    /// Every dispatch attempt failed
    #[error("job dispatch failed after {attempts} attempts")]
    #[diagnostic(
        code(pool::dispatch_exhausted),
        help("The sandbox runner never accepted the job; check that the image starts its runner")
    )]
    DispatchExhausted {
        attempts: u32,
        #[source]
        source: SandboxError,
    },

    /// The runner refused the job; retrying would not help
    #[error("the sandbox rejected the job")]
    #[diagnostic(code(pool::job_rejected))]
    JobRejected {
        #[source]
        source: SandboxError,
    },

    /// The pool was shut down before the job could run
    #[error("the sandbox pool has been shut down")]
    #[diagnostic(code(pool::shut_down))]
    ShutDown,

    /// The job's completion was dropped without a result
    #[error("job was dropped before it completed")]
    #[diagnostic(code(pool::abandoned))]
    Abandoned,
}

/// Errors related to a single sandbox: provisioning stages, the execution
/// protocol and teardown.
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    /// The platform reported no network address for the container
    #[error("container {container} has no network address")]
    #[diagnostic(
        code(sandbox::address_unavailable),
        help("Make sure the container is attached to a bridge network")
    )]
    AddressUnavailable { container: String },

    /// The runner could not be reached
    #[error("unable to contact sandbox at {address}: {reason}")]
    #[diagnostic(code(sandbox::unreachable))]
    UnreachableSandbox { address: SocketAddr, reason: String },

    /// The runner answered with an empty or unparsable body
    #[error("malformed response from sandbox at {address}: {reason}")]
    #[diagnostic(code(sandbox::malformed_response))]
    MalformedResponse { address: SocketAddr, reason: String },

    /// The runner rejected the request
    #[error("sandbox rejected the request with status {status}: {message}")]
    #[diagnostic(code(sandbox::rejected))]
    Rejected { status: u16, message: String },

    /// A job was sent to a sandbox that has no address yet
    #[error("sandbox {id} has not been provisioned")]
    #[diagnostic(code(sandbox::not_provisioned))]
    NotProvisioned { id: String },

    /// A container platform call failed
    #[error("container platform call `{operation}` failed")]
    #[diagnostic(code(sandbox::platform))]
    Platform {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    /// Stopping or removing the container failed
    #[error("teardown failed while running `{operation}`")]
    #[diagnostic(code(sandbox::teardown))]
    TeardownFailed {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    /// Preparing the host working directory failed
    #[error("sandbox workspace error: {context}")]
    #[diagnostic(code(sandbox::workspace))]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised inside the in-sandbox runner.
#[derive(Error, Debug, Diagnostic)]
pub enum RunnerError {
    /// No launcher exists for the language
    #[error("I don't know how to execute the {language} language")]
    #[diagnostic(
        code(runner::unsupported_language),
        help("Add a `{language}.sh` launcher to the launchers directory")
    )]
    UnsupportedLanguage { language: String },

    /// Writing or cleaning the run directory failed
    #[error("runner workspace error: {context}")]
    #[diagnostic(code(runner::workspace))]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Spawning or waiting on the launcher failed
    #[error("launcher process error: {context}")]
    #[diagnostic(code(runner::spawn))]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the container platform collaborator.
#[derive(Error, Debug, Diagnostic)]
pub enum PlatformError {
    /// Docker engine API error
    #[error("Docker error: {0}")]
    #[diagnostic(code(platform::docker), help("Is the Docker daemon running and reachable?"))]
    Docker(#[from] bollard::errors::Error),

    /// Any other platform failure
    #[error("{0}")]
    #[diagnostic(code(platform::other))]
    Other(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
