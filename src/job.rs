//! Jobs submitted to the pool.
//!
//! A [`Job`] pairs an immutable [`JobRequest`] with a one-shot completion.
//! Completing consumes the job, so the completion runs exactly once.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::PoolError;
use crate::protocol::{ExecuteRequest, ExecutionResult};

/// Outcome delivered to a job's completion.
pub type JobOutcome = Result<Vec<ExecutionResult>, PoolError>;

type Completion = Box<dyn FnOnce(JobOutcome) + Send + 'static>;

/// Description of one execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub code: String,
    pub language: String,
    /// One run per input, in order. May be empty.
    pub inputs: Vec<String>,
    pub timeout: Duration,
}

impl JobRequest {
    /// Creates a request with a single empty input.
    #[must_use]
    pub fn new(code: impl Into<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            inputs: vec![String::new()],
            timeout,
        }
    }

    /// Replaces the inputs.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the wire request sent to the runner.
    #[must_use]
    pub fn to_wire(&self) -> ExecuteRequest {
        ExecuteRequest {
            code: self.code.clone(),
            language: self.language.clone(),
            stdin: self.inputs.clone(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A request plus its completion.
pub struct Job {
    request: JobRequest,
    completion: Completion,
}

impl Job {
    /// Creates a job whose outcome is passed to `on_complete`.
    pub fn new<F>(request: JobRequest, on_complete: F) -> Self
    where
        F: FnOnce(JobOutcome) + Send + 'static,
    {
        Self {
            request,
            completion: Box::new(on_complete),
        }
    }

    /// Creates a job whose outcome is delivered through the returned ticket.
    #[must_use]
    pub fn channel(request: JobRequest) -> (Self, JobTicket) {
        let (tx, rx) = oneshot::channel();
        let job = Self::new(request, move |outcome| {
            // The submitter may have stopped waiting.
            let _ = tx.send(outcome);
        });
        (job, JobTicket { rx })
    }

    /// The request this job carries.
    #[must_use]
    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    /// Delivers the outcome.
    pub fn complete(self, outcome: JobOutcome) {
        (self.completion)(outcome);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("language", &self.request.language)
            .field("inputs", &self.request.inputs.len())
            .field("timeout", &self.request.timeout)
            .finish_non_exhaustive()
    }
}

/// Receiving side of [`Job::channel`].
#[derive(Debug)]
pub struct JobTicket {
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    /// Waits for the job to finish.
    ///
    /// # Errors
    ///
    /// Returns the job's error, or `PoolError::Abandoned` if the job was
    /// dropped without completing.
    pub async fn wait(self) -> JobOutcome {
        self.rx.await.unwrap_or(Err(PoolError::Abandoned))
    }
}
