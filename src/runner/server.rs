//! HTTP front of the runner: a single `POST /` endpoint.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, trace};

use super::{Executor, RunnerConfig};
use crate::error::RunnerError;
use crate::protocol::{ErrorBody, IncomingRequest, MISSING_FIELDS_MESSAGE};

/// Builds the runner's router.
pub fn router(executor: Arc<Executor>) -> Router {
    Router::new()
        .route("/", post(execute))
        .with_state(executor)
}

/// Reads the request body.
///
/// A body that is not declared as JSON, or does not parse into the request
/// shape, reads as an empty request so it fails validation like any other
/// request with missing fields.
fn parse_request(headers: &HeaderMap, body: &[u8]) -> IncomingRequest {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json")
                || mime.to_ascii_lowercase().ends_with("+json")
        });

    if !is_json {
        trace!("Request body is not JSON");
        return IncomingRequest::default();
    }

    serde_json::from_slice(body).unwrap_or_else(|e| {
        trace!(error = %e, "Request body does not match the request shape");
        IncomingRequest::default()
    })
}

#[instrument(skip_all)]
async fn execute(
    State(executor): State<Arc<Executor>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(request) = parse_request(&headers, &body).validate() else {
        debug!("Rejecting request with missing fields");
        return error_response(StatusCode::BAD_REQUEST, MISSING_FIELDS_MESSAGE.to_string());
    };

    debug!(
        language = %request.language,
        runs = request.inputs.len(),
        timeout_ms = request.timeout_ms,
        "Executing request"
    );

    let outcome = executor
        .execute(
            &request.code,
            &request.language,
            &request.inputs,
            Duration::from_millis(request.timeout_ms),
        )
        .await;

    match outcome {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(e @ RunnerError::UnsupportedLanguage { .. }) => {
            debug!(error = %e, "Unsupported language");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Execution failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

/// Serves the runner on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if the server fails.
pub async fn serve<F>(listener: TcpListener, executor: Arc<Executor>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(executor))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Runs the runner on all interfaces until Ctrl-C.
///
/// # Errors
///
/// Returns `Error::Io` if the port cannot be bound or the server fails.
pub async fn run(config: RunnerConfig) -> crate::error::Result<()> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(address).await?;
    let executor = Arc::new(Executor::new(&config));

    info!(
        %address,
        launchers = %config.launchers_dir.display(),
        "Runner listening"
    );

    serve(listener, executor, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Runner shutdown complete");
    Ok(())
}
