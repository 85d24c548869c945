//! Integration tests for the sandbox handle's execution protocol over HTTP.
//!
//! Each test stands up a small axum server on a loopback port playing the
//! part of the runner, and points a handle at it.

mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use uuid::Uuid;

use sandbox_pool::error::SandboxError;
use sandbox_pool::job::JobRequest;
use sandbox_pool::platform::{ContainerPlatform, ContainerSpec, LaunchOptions};
use sandbox_pool::protocol::ExecuteRequest;
use sandbox_pool::sandbox::{HttpTransport, RunnerTransport, SandboxHandle, TransportError};

use common::FakePlatform;

const MARGIN: Duration = Duration::from_millis(100);

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let address = listener.local_addr().expect("failed to read local address");
    tokio::spawn(async move { axum::serve(listener, router).await });
    address
}

async fn handle(platform: &FakePlatform) -> SandboxHandle {
    let spec = ContainerSpec {
        name: "sandbox-test".to_string(),
        launch: LaunchOptions::default(),
        host_mount: PathBuf::from("/nonexistent"),
    };
    let container = platform
        .create_container(&spec)
        .await
        .expect("failed to create fake container");
    SandboxHandle::new(Uuid::new_v4(), container, None)
}

fn request() -> JobRequest {
    JobRequest::new("print(input())", "python", Duration::from_millis(100))
}

/// Test that a well-formed answer is decoded into one result per input.
#[tokio::test]
async fn test_successful_exchange() {
    let address = serve(Router::new().route(
        "/",
        post(|Json(body): Json<Value>| async move {
            let results: Vec<Value> = body["stdin"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|input| json!({"stdout": input, "stderr": "", "combined": input, "isError": false}))
                .collect();
            Json(Value::Array(results))
        }),
    ))
    .await;

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let results = handle
        .execute_job(
            &HttpTransport::new(),
            &request().with_inputs(["a", "b"]),
            MARGIN,
        )
        .await
        .expect("exchange failed");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].stdout, "a");
    assert_eq!(results[1].stdout, "b");
    assert!(!results[0].is_error);
    assert!(!results[0].timed_out);
}

/// Test that a runner that answers after the deadline yields one timed-out
/// result per input.
#[tokio::test]
async fn test_deadline_yields_timed_out_results() {
    let address = serve(Router::new().route(
        "/",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "[]"
        }),
    ))
    .await;

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let results = handle
        .execute_job(
            &HttpTransport::new(),
            &request().with_inputs(["1", "2"]),
            MARGIN,
        )
        .await
        .expect("a deadline should not be an error");

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(result.timed_out);
        assert!(result.is_error);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
        assert!(result.combined.is_empty());
    }
}

/// Test that a closed port is reported as unreachable.
#[tokio::test]
async fn test_unreachable_runner() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let address = listener.local_addr().expect("failed to read local address");
    drop(listener);

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let result = handle
        .execute_job(&HttpTransport::new(), &request(), MARGIN)
        .await;

    assert!(
        matches!(result, Err(SandboxError::UnreachableSandbox { address: a, .. }) if a == address),
        "unexpected result: {result:?}"
    );
}

/// Test that an empty success body is a malformed response.
#[tokio::test]
async fn test_empty_body_is_malformed() {
    let address = serve(Router::new().route("/", post(|| async { StatusCode::OK }))).await;

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let result = handle
        .execute_job(&HttpTransport::new(), &request(), MARGIN)
        .await;

    match result {
        Err(SandboxError::MalformedResponse { reason, .. }) => {
            assert_eq!(reason, "empty response from container");
        }
        other => panic!("expected a malformed response, got {other:?}"),
    }
}

/// Test that a body that is not a result list is a malformed response.
#[tokio::test]
async fn test_unparsable_body_is_malformed() {
    let address = serve(Router::new().route("/", post(|| async { "not json" }))).await;

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let result = handle
        .execute_job(&HttpTransport::new(), &request(), MARGIN)
        .await;

    assert!(matches!(result, Err(SandboxError::MalformedResponse { .. })));
}

/// Test that an error status carries the runner's error message.
#[tokio::test]
async fn test_error_status_is_rejected() {
    let address = serve(Router::new().route(
        "/",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "no code, timeout or language specified"})),
            )
        }),
    ))
    .await;

    let platform = FakePlatform::new();
    let handle = handle(&platform).await.with_address(address);

    let result = handle
        .execute_job(&HttpTransport::new(), &request(), MARGIN)
        .await;

    match result {
        Err(SandboxError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "no code, timeout or language specified");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

/// Test that a handle without an address refuses to execute.
#[tokio::test]
async fn test_unprovisioned_handle() {
    let platform = FakePlatform::new();
    let handle = handle(&platform).await;

    let result = handle
        .execute_job(&HttpTransport::new(), &request(), MARGIN)
        .await;

    assert!(matches!(result, Err(SandboxError::NotProvisioned { .. })));
}

/// Test that teardown stops and removes the container only once.
#[tokio::test]
async fn test_teardown_is_idempotent() {
    let platform = FakePlatform::new();
    let mut handle = handle(&platform).await;

    handle.teardown().await.expect("first teardown failed");
    handle.teardown().await.expect("second teardown failed");

    assert!(handle.is_torn_down());
    assert_eq!(platform.log.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(platform.log.removed.load(Ordering::SeqCst), 1);
}

/// Transport that answers with an empty result list and remembers the
/// deadline it was given.
#[derive(Default)]
struct DeadlineRecorder {
    deadlines: Mutex<Vec<Duration>>,
}

#[async_trait]
impl RunnerTransport for DeadlineRecorder {
    async fn post(
        &self,
        _address: SocketAddr,
        _request: &ExecuteRequest,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.deadlines.lock().unwrap().push(deadline);
        Ok(b"[]".to_vec())
    }
}

/// Test that the request deadline is the timeout plus the margin, and that
/// an enormous timeout saturates instead of overflowing.
#[tokio::test]
async fn test_deadline_adds_margin_and_saturates() {
    let platform = FakePlatform::new();
    let address: SocketAddr = "127.0.0.1:3000".parse().expect("failed to parse address");
    let handle = handle(&platform).await.with_address(address);
    let transport = DeadlineRecorder::default();

    handle
        .execute_job(&transport, &request(), MARGIN)
        .await
        .expect("exchange failed");

    let huge = JobRequest::new("x", "python", Duration::MAX);
    handle
        .execute_job(&transport, &huge, MARGIN)
        .await
        .expect("exchange failed");

    let deadlines = transport.deadlines.lock().unwrap().clone();
    assert_eq!(deadlines, [Duration::from_millis(200), Duration::MAX]);
}
