//! Configuration for the sandbox pool.

use std::path::PathBuf;
use std::time::Duration;

use crate::platform::LaunchOptions;

/// Total attempts made to hand a job to its sandbox before giving up.
pub const DISPATCH_ATTEMPTS: u32 = 10;

/// Fixed delay between dispatch attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Extra time added to a job's timeout for the request deadline.
pub const REQUEST_MARGIN: Duration = Duration::from_millis(500);

/// Grace period given to a new container before it is used.
pub const WARMUP_DELAY: Duration = Duration::from_secs(10);

/// Default port the in-sandbox runner listens on.
pub const DEFAULT_RUNNER_PORT: u16 = 3000;

/// Configuration for a [`SandboxPool`](super::SandboxPool).
///
/// # Example
///
/// ```
/// use sandbox_pool::pool::PoolConfig;
/// use sandbox_pool::platform::LaunchOptions;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_launch(LaunchOptions::new("code-runner:latest"))
///     .with_tmp_dir("/var/tmp/sandboxes")
///     .with_template_dir("/opt/runner/container")
///     .with_warmup(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Host directory under which per-sandbox working directories are made.
    pub tmp_dir: PathBuf,

    /// Template filesystem copied into each working directory.
    pub template_dir: Option<PathBuf>,

    /// Options for every container created.
    pub launch: LaunchOptions,

    /// Port of the runner inside each container.
    pub runner_port: u16,

    /// Fixed delay between inspecting a container and handing it out.
    pub warmup: Duration,

    /// Total dispatch attempts per job.
    pub dispatch_attempts: u32,

    /// Delay between dispatch attempts, and between replacement attempts.
    pub retry_interval: Duration,

    /// Added to the job timeout to form the request deadline.
    pub request_margin: Duration,

    /// Attempts made to provision a replacement after a job.
    pub replacement_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir().join("sandbox-pool"),
            template_dir: None,
            launch: LaunchOptions::default(),
            runner_port: DEFAULT_RUNNER_PORT,
            warmup: WARMUP_DELAY,
            dispatch_attempts: DISPATCH_ATTEMPTS,
            retry_interval: RETRY_INTERVAL,
            request_margin: REQUEST_MARGIN,
            replacement_attempts: 3,
        }
    }
}

impl PoolConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tmp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_dir = path.into();
        self
    }

    #[must_use]
    pub fn with_template_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_launch(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    #[must_use]
    pub fn with_runner_port(mut self, port: u16) -> Self {
        self.runner_port = port;
        self
    }

    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Sets the dispatch retry policy.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.dispatch_attempts = attempts;
        self.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_request_margin(mut self, margin: Duration) -> Self {
        self.request_margin = margin;
        self
    }

    #[must_use]
    pub fn with_replacement_attempts(mut self, attempts: u32) -> Self {
        self.replacement_attempts = attempts;
        self
    }
}
