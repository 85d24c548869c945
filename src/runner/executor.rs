//! Runs submitted code once per input through a language launcher.
//!
//! Each request gets its own run directory holding a single source file.
//! Inputs run one after another; each run is a fresh process group so a
//! timeout kills the launcher together with everything it spawned.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::RunnerConfig;
use super::language::{Language, LanguageRegistry};
use crate::error::RunnerError;
use crate::protocol::ExecutionResult;

/// How long to keep reading output after the process has exited or been
/// killed. Grandchildren that escaped the group may hold the pipes open.
pub const DRAIN_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8192;

/// Executes code through the launchers of a [`LanguageRegistry`].
#[derive(Debug, Clone)]
pub struct Executor {
    registry: LanguageRegistry,
    work_root: PathBuf,
    shell: PathBuf,
}

impl Executor {
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        Self::with_registry(
            LanguageRegistry::new(&config.launchers_dir),
            config.work_root.clone(),
            config.shell.clone(),
        )
    }

    #[must_use]
    pub fn with_registry(registry: LanguageRegistry, work_root: PathBuf, shell: PathBuf) -> Self {
        Self {
            registry,
            work_root,
            shell,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Runs `code` once per input, in order, each under `timeout`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `RunnerError::UnsupportedLanguage` if there is no launcher for `language`
    /// - `RunnerError::Workspace` if the run directory cannot be written
    /// - `RunnerError::Spawn` if a launcher cannot be started
    #[instrument(skip(self, code, inputs), fields(runs = inputs.len(), timeout_ms = millis(timeout)))]
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        inputs: &[String],
        timeout: Duration,
    ) -> Result<Vec<ExecutionResult>, RunnerError> {
        let language = self.registry.resolve(language).await?;

        let run_dir = self.work_root.join(Uuid::new_v4().to_string());
        let outcome = self
            .execute_in(&run_dir, &language, code, inputs, timeout)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(run_dir = %run_dir.display(), error = %e, "Failed to remove run directory");
            }
        }

        outcome
    }

    async fn execute_in(
        &self,
        run_dir: &Path,
        language: &Language,
        code: &str,
        inputs: &[String],
        timeout: Duration,
    ) -> Result<Vec<ExecutionResult>, RunnerError> {
        tokio::fs::create_dir_all(run_dir)
            .await
            .map_err(|source| RunnerError::Workspace {
                context: format!("failed to create run directory {}", run_dir.display()),
                source,
            })?;

        let source_file = run_dir.join(format!("code{}", language.extension));
        tokio::fs::write(&source_file, language.source_for(code))
            .await
            .map_err(|source| RunnerError::Workspace {
                context: format!("failed to write {}", source_file.display()),
                source,
            })?;
        trace!(file = %source_file.display(), "Source written");

        let mut results = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let result = self
                .run_once(language, &source_file, run_dir, input, timeout)
                .await?;
            debug!(
                run = index,
                is_error = result.is_error,
                timed_out = result.timed_out,
                "Run finished"
            );
            results.push(result);
        }

        Ok(results)
    }

    async fn run_once(
        &self,
        language: &Language,
        source_file: &Path,
        run_dir: &Path,
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, RunnerError> {
        let mut child = Command::new(&self.shell)
            .arg(&language.launcher)
            .arg(source_file)
            .current_dir(run_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                context: format!("failed to start launcher {}", language.launcher.display()),
                source,
            })?;
        let pid = child.id();

        let feeder = feed_stdin(&mut child, input);

        let (tx, rx) = mpsc::unbounded_channel();
        let stdout_reader = spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
        let stderr_reader = spawn_reader(child.stderr.take(), Stream::Stderr, tx);
        let collector = tokio::spawn(collect(rx));

        let status = tokio::select! {
            status = child.wait() => Some(status),
            () = tokio::time::sleep(timeout) => None,
        };

        let status = match status {
            Some(Ok(status)) => Some(status),
            Some(Err(source)) => {
                feeder.abort();
                return Err(RunnerError::Spawn {
                    context: "failed to wait for launcher".to_string(),
                    source,
                });
            }
            None => {
                warn!(pid, timeout_ms = millis(timeout), "Process timed out, killing its group");
                kill_group(&mut child, pid).await;
                None
            }
        };

        let aborts = [stdout_reader.abort_handle(), stderr_reader.abort_handle()];
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = stdout_reader.await;
            let _ = stderr_reader.await;
        })
        .await;
        if drained.is_err() {
            debug!(pid, "Output still open after exit, abandoning readers");
            for handle in &aborts {
                handle.abort();
            }
        }
        feeder.abort();

        let capture = collector.await.unwrap_or_default();
        Ok(capture.into_result(status))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    combined: Vec<u8>,
}

impl Capture {
    fn push(&mut self, stream: Stream, chunk: &[u8]) {
        match stream {
            Stream::Stdout => self.stdout.extend_from_slice(chunk),
            Stream::Stderr => self.stderr.extend_from_slice(chunk),
        }
        self.combined.extend_from_slice(chunk);
    }

    /// `status` is `None` when the runner killed the process.
    fn into_result(self, status: Option<ExitStatus>) -> ExecutionResult {
        let timed_out = status.is_none();
        ExecutionResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            combined: String::from_utf8_lossy(&self.combined).into_owned(),
            is_error: status.is_none_or(|s| !s.success()),
            timed_out,
            killed_by_container: timed_out,
        }
    }
}

/// Writes the input and closes stdin so the program sees end-of-file.
///
/// Runs in its own task: a program that never reads must not block the run.
fn feed_stdin(child: &mut Child, input: &str) -> JoinHandle<()> {
    let stdin = child.stdin.take();
    let input = input.as_bytes().to_vec();
    tokio::spawn(async move {
        let Some(mut stdin) = stdin else { return };
        if !input.is_empty() {
            if let Err(e) = stdin.write_all(&input).await {
                trace!(error = %e, "Program closed stdin early");
                return;
            }
        }
        let _ = stdin.shutdown().await;
    })
}

fn spawn_reader<R>(
    reader: Option<R>,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, Vec<u8>)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else { return };
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    trace!(?stream, error = %e, "Output read failed");
                    break;
                }
            }
        }
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn collect(mut rx: mpsc::UnboundedReceiver<(Stream, Vec<u8>)>) -> Capture {
    let mut capture = Capture::default();
    while let Some((stream, chunk)) = rx.recv().await {
        capture.push(stream, &chunk);
    }
    capture
}

/// Kills the launcher's whole process group, then reaps the launcher.
async fn kill_group(child: &mut Child, pid: Option<u32>) {
    let group = pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw);

    match group {
        Some(group) => {
            if let Err(e) = killpg(group, Signal::SIGKILL) {
                warn!(%group, error = %e, "Failed to kill process group, killing launcher only");
                let _ = child.start_kill();
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }

    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap killed launcher");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_interleaves_streams() {
        let mut capture = Capture::default();
        capture.push(Stream::Stdout, b"one\n");
        capture.push(Stream::Stderr, b"two\n");
        capture.push(Stream::Stdout, b"three\n");

        let result = capture.into_result(None);
        assert_eq!(result.stdout, "one\nthree\n");
        assert_eq!(result.stderr, "two\n");
        assert_eq!(result.combined, "one\ntwo\nthree\n");
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_killed_run_is_timed_out_error() {
        let result = Capture::default().into_result(None);
        assert!(result.timed_out);
        assert!(result.killed_by_container);
        assert!(result.is_error);
    }
}
