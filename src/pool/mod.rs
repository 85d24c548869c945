//! The pool orchestrator.
//!
//! The pool keeps a FIFO queue of idle, ready sandboxes and a FIFO queue of
//! jobs waiting for one. A sandbox is used for exactly one job:
//!
//! 1. a job is bound to the oldest idle sandbox, or queued if there is none
//! 2. the job is sent to the sandbox, retrying transient failures
//! 3. the job's completion runs
//! 4. the sandbox is torn down
//! 5. a replacement is provisioned in the background; once ready it serves
//!    the oldest queued job or joins the idle queue
//!
//! Both queues live behind one lock and every mutation is a single step with
//! no await while the lock is held. A sandbox is removed from the idle queue
//! in the same step that claims it, so two dispatches never share one.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sandbox_pool::job::JobRequest;
//! use sandbox_pool::pool::{PoolConfig, SandboxPool};
//!
//! # async fn demo() -> miette::Result<()> {
//! let pool = SandboxPool::docker(PoolConfig::default()).await?;
//! pool.initialize(4).await?;
//!
//! let ticket = pool.run(JobRequest::new("print(1+1)", "python", Duration::from_secs(2)));
//! let results = ticket.wait().await?;
//! assert_eq!(results[0].stdout.trim(), "2");
//!
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod provision;

pub use config::{
    DEFAULT_RUNNER_PORT, DISPATCH_ATTEMPTS, PoolConfig, REQUEST_MARGIN, RETRY_INTERVAL,
    WARMUP_DELAY,
};
pub use provision::{ProvisionStage, Provisioner};

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PlatformError, PoolError, SandboxError};
use crate::job::{Job, JobOutcome, JobRequest, JobTicket};
use crate::platform::{ContainerPlatform, DockerPlatform};
use crate::protocol::ExecutionResult;
use crate::sandbox::{HttpTransport, RunnerTransport, SandboxHandle, SandboxId};

/// A warm pool of single-use sandboxes.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: Arc<PoolConfig>,
    provisioner: Provisioner,
    transport: Arc<dyn RunnerTransport>,
    state: Mutex<PoolState>,
    /// Dispatches, replacements and late teardowns still running.
    tasks: Mutex<JoinSet<()>>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<SandboxHandle>,
    pending: VecDeque<Job>,
    shut_down: bool,
}

impl SandboxPool {
    /// Creates an empty pool. Call [`initialize`](Self::initialize) to fill it.
    #[must_use]
    pub fn new(
        config: PoolConfig,
        platform: Arc<dyn ContainerPlatform>,
        transport: Arc<dyn RunnerTransport>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            inner: Arc::new(PoolInner {
                provisioner: Provisioner::new(platform, Arc::clone(&config)),
                config,
                transport,
                state: Mutex::new(PoolState::default()),
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Creates an empty pool backed by the local Docker daemon and the HTTP
    /// runner protocol.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Docker` if the daemon is unreachable.
    pub async fn docker(config: PoolConfig) -> Result<Self, PlatformError> {
        let platform = DockerPlatform::connect().await?;
        Ok(Self::new(
            config,
            Arc::new(platform),
            Arc::new(HttpTransport::new()),
        ))
    }

    /// Provisions `size` sandboxes in parallel and waits for all of them.
    ///
    /// If any sandbox fails to come up the pool is shut down, the sandboxes
    /// that did come up are torn down, and the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `PoolError::InvalidPoolSize` if `size` is zero
    /// - `PoolError::ShutDown` if the pool has already been shut down
    /// - `PoolError::ProvisioningFailed` if any sandbox failed to provision
    #[instrument(skip(self))]
    pub async fn initialize(&self, size: usize) -> Result<(), PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidPoolSize { size });
        }
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        info!(size, "Creating the sandbox pool");

        let inner = &self.inner;
        let startups = (0..size).map(|_| async move {
            let handle = inner.provisioner.provision().await?;
            inner.register(handle);
            Ok::<(), PoolError>(())
        });

        let failure = join_all(startups)
            .await
            .into_iter()
            .filter_map(Result::err)
            .next();

        if let Some(e) = failure {
            error!(error = %e, "Sandbox pool failed to start");
            self.shutdown().await;
            return Err(e);
        }

        info!(size, "Sandbox pool ready");
        Ok(())
    }

    /// Submits a job without waiting for it.
    ///
    /// The job runs on the oldest idle sandbox if there is one, otherwise it
    /// is queued behind earlier jobs. Its completion runs exactly once.
    pub fn submit(&self, job: Job) {
        let mut state = self.inner.lock();

        if state.shut_down {
            drop(state);
            job.complete(Err(PoolError::ShutDown));
            return;
        }

        let claimed = state.idle.pop_front();
        match claimed {
            Some(sandbox) => {
                drop(state);
                self.inner.dispatch(job, sandbox);
            }
            None => {
                state.pending.push_back(job);
                debug!(
                    pending = state.pending.len(),
                    "No sandbox available, job queued"
                );
            }
        }
    }

    /// Submits a request and returns a ticket for its outcome.
    pub fn run(&self, request: JobRequest) -> JobTicket {
        let (job, ticket) = Job::channel(request);
        self.submit(job);
        ticket
    }

    /// Tears down every idle sandbox and stops the pool.
    ///
    /// Queued jobs complete with `PoolError::ShutDown`. Sandboxes still being
    /// provisioned, or busy with a job, are torn down when they finish, and
    /// this waits for that to happen. A busy sandbox can hold shutdown for up
    /// to `dispatch_attempts` request deadlines.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let (idle, pending) = {
            let mut state = self.inner.lock();
            state.shut_down = true;
            (mem::take(&mut state.idle), mem::take(&mut state.pending))
        };

        info!(
            idle = idle.len(),
            pending = pending.len(),
            "Cleaning up all sandboxes"
        );

        for job in pending {
            job.complete(Err(PoolError::ShutDown));
        }

        join_all(idle.into_iter().map(teardown_quietly)).await;
        self.inner.drain().await;
    }

    /// Number of idle sandboxes.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Number of jobs waiting for a sandbox.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Ids of the idle sandboxes, oldest first.
    #[must_use]
    pub fn idle_ids(&self) -> Vec<SandboxId> {
        self.inner.lock().idle.iter().map(SandboxHandle::id).collect()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for SandboxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SandboxPool")
            .field("idle", &state.idle.len())
            .field("pending", &state.pending.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `task` in the background, tracked so shutdown can wait for it.
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Waits for every tracked task, including ones spawned while waiting.
    async fn drain(&self) {
        loop {
            let mut running = mem::take(
                &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if running.is_empty() {
                return;
            }

            debug!(tasks = running.len(), "Waiting for background work");
            while let Some(result) = running.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Background pool task failed");
                }
            }
        }
    }

    /// Hands a ready sandbox to the oldest queued job, or makes it idle.
    fn register(self: &Arc<Self>, sandbox: SandboxHandle) {
        let mut state = self.lock();

        if state.shut_down {
            drop(state);
            debug!(sandbox = %sandbox.id(), "Pool is shut down, discarding new sandbox");
            self.spawn(teardown_quietly(sandbox));
            return;
        }

        let waiting = state.pending.pop_front();
        match waiting {
            Some(job) => {
                debug!(
                    sandbox = %sandbox.id(),
                    still_pending = state.pending.len(),
                    "Serving queued job"
                );
                drop(state);
                self.dispatch(job, sandbox);
            }
            None => {
                state.idle.push_back(sandbox);
            }
        }
    }

    fn dispatch(self: &Arc<Self>, job: Job, sandbox: SandboxHandle) {
        let inner = Arc::clone(self);
        self.spawn(async move { inner.run_job(job, sandbox).await });
    }

    /// Runs one job to completion, then discards and replaces its sandbox.
    async fn run_job(self: Arc<Self>, job: Job, mut sandbox: SandboxHandle) {
        let idle_ms = (Utc::now() - sandbox.provisioned_at()).num_milliseconds();
        debug!(sandbox = %sandbox.id(), idle_ms, "Executing job");

        let outcome = self.execute_with_retry(job.request(), &sandbox).await;
        if let Err(e) = &outcome {
            warn!(sandbox = %sandbox.id(), error = %e, "Job dispatch failed");
        }

        // The submitter hears back before cleanup starts.
        job.complete(outcome);

        if let Err(e) = sandbox.teardown().await {
            warn!(sandbox = %sandbox.id(), error = %e, "Failed to tear down used sandbox");
        }

        self.replace();
    }

    async fn execute_with_retry(
        &self,
        request: &JobRequest,
        sandbox: &SandboxHandle,
    ) -> JobOutcome {
        let attempts = self.config.dispatch_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result: Result<Vec<ExecutionResult>, SandboxError> = sandbox
                .execute_job(self.transport.as_ref(), request, self.config.request_margin)
                .await;

            match result {
                Ok(results) => return Ok(results),
                Err(source @ SandboxError::Rejected { .. }) => {
                    return Err(PoolError::JobRejected { source });
                }
                Err(source) if attempt >= attempts => {
                    return Err(PoolError::DispatchExhausted { attempts, source });
                }
                Err(e) => {
                    debug!(sandbox = %sandbox.id(), attempt, error = %e, "Dispatch attempt failed, retrying");
                    tokio::time::sleep(self.config.retry_interval).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Provisions a replacement sandbox in the background.
    fn replace(self: &Arc<Self>) {
        if self.lock().shut_down {
            return;
        }

        let inner = Arc::clone(self);
        self.spawn(async move {
            let attempts = inner.config.replacement_attempts.max(1);

            for attempt in 1..=attempts {
                match inner.provisioner.provision().await {
                    Ok(sandbox) => {
                        debug!(sandbox = %sandbox.id(), "Replacement sandbox ready");
                        inner.register(sandbox);
                        return;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Replacement sandbox failed to provision");
                    }
                }

                if attempt < attempts {
                    tokio::time::sleep(inner.config.retry_interval).await;
                }
            }

            error!(
                attempts,
                "Giving up on replacement sandbox, the pool is one sandbox short"
            );
        });
    }
}

async fn teardown_quietly(mut sandbox: SandboxHandle) {
    if let Err(e) = sandbox.teardown().await {
        warn!(sandbox = %sandbox.id(), error = %e, "Failed to tear down sandbox");
    }
}
