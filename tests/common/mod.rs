//! Test doubles shared by the integration tests.
//!
//! `FakePlatform` hands out in-memory containers with distinct addresses and
//! counts lifecycle calls. `ScriptedTransport` answers execution requests
//! without a network and records which address served which job.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use sandbox_pool::error::PlatformError;
use sandbox_pool::platform::{ContainerInfo, ContainerPlatform, ContainerSpec, PlatformContainer};
use sandbox_pool::pool::PoolConfig;
use sandbox_pool::protocol::{ErrorBody, ExecuteRequest, ExecutionResult};
use sandbox_pool::sandbox::{RunnerTransport, TransportError};

/// A unique scratch directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("sandbox-pool-test-{label}"))
        .join(Uuid::new_v4().to_string())
}

/// Pool settings that keep tests fast: no warm-up, short retries.
pub fn fast_config(label: &str) -> PoolConfig {
    PoolConfig::new()
        .with_tmp_dir(scratch_dir(label))
        .with_warmup(Duration::ZERO)
        .with_retry(3, Duration::from_millis(10))
        .with_request_margin(Duration::from_millis(100))
        .with_replacement_attempts(2)
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Stage at which a fake container misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Create,
    Start,
    Inspect,
    NoAddress,
}

/// Lifecycle call counters.
#[derive(Debug, Default)]
pub struct PlatformLog {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub removed: AtomicUsize,
    pub mounts: Mutex<Vec<PathBuf>>,
}

impl PlatformLog {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct FakePlatform {
    pub log: Arc<PlatformLog>,
    next_index: AtomicUsize,
    failure: Option<(Failure, usize)>,
    stop_delay: Duration,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers numbered `from` and later fail at `failure`.
    pub fn failing(failure: Failure, from: usize) -> Self {
        Self {
            failure: Some((failure, from)),
            ..Self::default()
        }
    }

    /// Every container takes `delay` to stop.
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }
}

#[async_trait]
impl ContainerPlatform for FakePlatform {
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn PlatformContainer>, PlatformError> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failure
            .filter(|(_, from)| index >= *from)
            .map(|(failure, _)| failure);

        if failure == Some(Failure::Create) {
            return Err(PlatformError::Other("create refused".to_string()));
        }

        self.log.created.fetch_add(1, Ordering::SeqCst);
        self.log
            .mounts
            .lock()
            .unwrap()
            .push(spec.host_mount.clone());

        let octets = u16::try_from(index + 1).expect("too many fake containers");
        let [hi, lo] = octets.to_be_bytes();

        Ok(Box::new(FakeContainer {
            id: format!("fake-{index}"),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, hi, lo)),
            failure,
            stop_delay: self.stop_delay,
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Debug)]
struct FakeContainer {
    id: String,
    ip: IpAddr,
    failure: Option<Failure>,
    stop_delay: Duration,
    log: Arc<PlatformLog>,
}

#[async_trait]
impl PlatformContainer for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), PlatformError> {
        if self.failure == Some(Failure::Start) {
            return Err(PlatformError::Other("start refused".to_string()));
        }
        self.log.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn inspect(&self) -> Result<ContainerInfo, PlatformError> {
        match self.failure {
            Some(Failure::Inspect) => Err(PlatformError::Other("inspect refused".to_string())),
            Some(Failure::NoAddress) => Ok(ContainerInfo::default()),
            _ => Ok(ContainerInfo {
                network_address: Some(self.ip),
            }),
        }
    }

    async fn stop(&self) -> Result<(), PlatformError> {
        tokio::time::sleep(self.stop_delay).await;
        self.log.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, _force: bool) -> Result<(), PlatformError> {
        self.log.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// How the scripted runner answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// One result per input with stdout `{code}:{input}`.
    Echo,
    /// Connection failure on every post.
    Unreachable,
    /// The deadline always elapses.
    Hang,
    /// An error status with a runner error body.
    Reject { status: u16, message: String },
}

#[derive(Debug)]
pub struct ScriptedTransport {
    reply: Reply,
    delay: Duration,
    fail_first: AtomicUsize,
    pub posts: AtomicUsize,
    /// `(address, code)` of every successful exchange, in completion order.
    pub served: Mutex<Vec<(SocketAddr, String)>>,
    /// Codes in the order their first post arrived.
    pub arrivals: Mutex<Vec<String>>,
    in_flight: Mutex<HashMap<SocketAddr, usize>>,
    pub max_in_flight_per_address: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            fail_first: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
            served: Mutex::new(Vec::new()),
            arrivals: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight_per_address: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(Reply::Echo)
    }

    /// Each exchange takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `count` posts fail as unreachable.
    pub fn with_failures(self, count: usize) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn served(&self) -> Vec<(SocketAddr, String)> {
        self.served.lock().unwrap().clone()
    }

    pub fn arrivals(&self) -> Vec<String> {
        self.arrivals.lock().unwrap().clone()
    }

    fn enter(&self, address: SocketAddr) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(address).or_insert(0);
        *count += 1;
        self.max_in_flight_per_address
            .fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, address: SocketAddr) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&address) {
            *count -= 1;
        }
    }

    async fn answer(
        &self,
        address: SocketAddr,
        request: &ExecuteRequest,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let remaining_failures = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining_failures.is_ok() {
            return Err(TransportError::Failed("connection refused".to_string()));
        }

        match &self.reply {
            Reply::Echo => {
                tokio::time::sleep(self.delay).await;
                let results: Vec<ExecutionResult> = request
                    .stdin
                    .iter()
                    .map(|input| {
                        let stdout = format!("{}:{}", request.code, input);
                        ExecutionResult {
                            combined: stdout.clone(),
                            stdout,
                            ..ExecutionResult::default()
                        }
                    })
                    .collect();
                self.served
                    .lock()
                    .unwrap()
                    .push((address, request.code.clone()));
                Ok(serde_json::to_vec(&results).expect("failed to encode results"))
            }
            Reply::Unreachable => Err(TransportError::Failed("connection refused".to_string())),
            Reply::Hang => {
                tokio::time::sleep(deadline).await;
                Err(TransportError::TimedOut)
            }
            Reply::Reject { status, message } => Err(TransportError::Status {
                status: *status,
                body: serde_json::to_vec(&ErrorBody {
                    error: message.clone(),
                })
                .expect("failed to encode error"),
            }),
        }
    }
}

#[async_trait]
impl RunnerTransport for ScriptedTransport {
    async fn post(
        &self,
        address: SocketAddr,
        request: &ExecuteRequest,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        {
            let mut arrivals = self.arrivals.lock().unwrap();
            if !arrivals.contains(&request.code) {
                arrivals.push(request.code.clone());
            }
        }

        self.enter(address);
        let outcome = self.answer(address, request, deadline).await;
        self.leave(address);
        outcome
    }
}
