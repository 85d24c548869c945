//! Configuration for the in-sandbox runner.

use std::path::PathBuf;

use crate::pool::DEFAULT_RUNNER_PORT;

/// Configuration for the runner service.
///
/// # Example
///
/// ```
/// use sandbox_pool::runner::RunnerConfig;
///
/// let config = RunnerConfig::default()
///     .with_port(3000)
///     .with_launchers_dir("/usr/src/app/executors")
///     .with_work_root("/usr/src/app/temp");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// TCP port to listen on (all interfaces).
    pub port: u16,

    /// Directory holding one `{language}.sh` launcher per language.
    pub launchers_dir: PathBuf,

    /// Directory under which per-request run directories are created.
    pub work_root: PathBuf,

    /// Shell used to run launcher scripts.
    pub shell: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RUNNER_PORT,
            launchers_dir: PathBuf::from("executors"),
            work_root: std::env::temp_dir().join("sandbox-runner"),
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl RunnerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_launchers_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.launchers_dir = path.into();
        self
    }

    #[must_use]
    pub fn with_work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_root = path.into();
        self
    }

    #[must_use]
    pub fn with_shell(mut self, path: impl Into<PathBuf>) -> Self {
        self.shell = path.into();
        self
    }
}
