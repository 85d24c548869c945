//! Container platform collaborator.
//!
//! The pool only needs five operations from the platform: create, start,
//! inspect, stop and remove. [`ContainerPlatform`] and [`PlatformContainer`]
//! capture exactly those, and [`DockerPlatform`] implements them against the
//! Docker engine API.

mod docker;

pub use docker::DockerPlatform;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::PlatformError;

/// Default path where the runner expects its application directory.
pub const DEFAULT_RUNNER_MOUNT: &str = "/usr/src/app";

/// Default name of the working sub-directory bind-mounted into the container.
pub const DEFAULT_SHARED_SUBDIR: &str = "shared";

/// Options used for every container the pool creates.
///
/// # Example
///
/// ```
/// use sandbox_pool::platform::LaunchOptions;
///
/// let options = LaunchOptions::new("code-runner:latest")
///     .with_env("NODE_ENV", "production")
///     .with_memory_bytes(256 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Image the container is created from.
    pub image: String,
    /// Path inside the container where the working sub-directory is mounted.
    pub runner_mount: String,
    /// Sub-directory of the sandbox working directory that gets mounted.
    pub shared_subdir: String,
    /// Environment variables set in the container.
    pub env: HashMap<String, String>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// CPU quota in billionths of a CPU.
    pub nano_cpus: Option<i64>,
    /// Docker network mode (e.g. `bridge`).
    pub network_mode: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            image: String::from("code-runner:latest"),
            runner_mount: String::from(DEFAULT_RUNNER_MOUNT),
            shared_subdir: String::from(DEFAULT_SHARED_SUBDIR),
            env: HashMap::new(),
            memory_bytes: None,
            nano_cpus: None,
            network_mode: None,
        }
    }
}

impl LaunchOptions {
    /// Creates options for the given image.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Sets the in-container mount point.
    #[must_use]
    pub fn with_runner_mount(mut self, path: impl Into<String>) -> Self {
        self.runner_mount = path.into();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_bytes(mut self, bytes: i64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Sets the CPU quota.
    #[must_use]
    pub fn with_nano_cpus(mut self, nano_cpus: i64) -> Self {
        self.nano_cpus = Some(nano_cpus);
        self
    }

    /// Sets the network mode.
    #[must_use]
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }
}

/// A container creation request for one sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Shared launch options.
    pub launch: LaunchOptions,
    /// Host directory bind-mounted at `launch.runner_mount`.
    pub host_mount: PathBuf,
}

impl ContainerSpec {
    /// The `host:container` bind string.
    #[must_use]
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host_mount.display(), self.launch.runner_mount)
    }
}

/// What the platform reports back about a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub network_address: Option<IpAddr>,
}

/// Factory side of the platform.
#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    /// Creates (but does not start) a container.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn PlatformContainer>, PlatformError>;
}

/// Ownership handle to one platform container.
#[async_trait]
pub trait PlatformContainer: Send + Sync + fmt::Debug {
    /// Platform identifier of the container.
    fn id(&self) -> &str;

    async fn start(&self) -> Result<(), PlatformError>;

    async fn inspect(&self) -> Result<ContainerInfo, PlatformError>;

    async fn stop(&self) -> Result<(), PlatformError>;

    async fn remove(&self, force: bool) -> Result<(), PlatformError>;
}
