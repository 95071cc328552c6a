//! HTTP surface
//!
//! `POST /submit` enqueues a submission; `POST /run` grades one synchronously
//! on a slot borrowed straight from the pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::app::App;
use crate::core::{ResultCode, Submission};
use crate::pool::WorkerPool;
use crate::queue::stopped;
use crate::scheduler;

/// How long `/run` waits for a free slot
pub const RUN_SLOT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("No workers available")]
    NoWorkers,
    #[error("Grading panicked")]
    Panicked,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    result: ResultCode,
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/run", post(run))
        .layer(middleware::from_fn(log_request))
        .with_state(app)
}

/// Serve until the shutdown flag flips
pub async fn serve(app: Arc<App>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], app.config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move { stopped(&mut shutdown).await })
        .await
        .context("HTTP server failed")
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        "{} {} -> {} in {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

async fn submit(State(app): State<Arc<App>>, body: Bytes) -> (StatusCode, &'static str) {
    if let Err(e) = serde_json::from_slice::<Submission>(&body) {
        warn!("Rejected /submit body: {}", e);
        return (StatusCode::BAD_REQUEST, "Invalid submission");
    }

    match app.publisher.publish(&body).await {
        Ok(()) => (StatusCode::OK, "Submission queued"),
        Err(e) => {
            error!("Failed to queue submission: {:#}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Failed to queue submission")
        }
    }
}

async fn run(State(app): State<Arc<App>>, body: Bytes) -> Response {
    let submission: Submission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) => {
            warn!("Rejected /run body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid submission").into_response();
        }
    };

    match grade_on_pool(&app.pool, submission, RUN_SLOT_WAIT).await {
        Ok(result) => Json(RunResponse { result }).into_response(),
        Err(e @ RunError::NoWorkers) => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(RunError::Panicked) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Grade a submission on a slot taken directly from the pool, without
/// reporting. The slot is reset and returned even if grading panics.
pub async fn grade_on_pool(
    pool: &Arc<WorkerPool>,
    submission: Submission,
    wait: Duration,
) -> Result<ResultCode, RunError> {
    let lease = match timeout(wait, pool.acquire()).await {
        Ok(Ok(lease)) => lease,
        Ok(Err(e)) => {
            error!("Cannot acquire slot for /run: {}", e);
            return Err(RunError::NoWorkers);
        }
        Err(_) => return Err(RunError::NoWorkers),
    };

    let gateway = lease.gateway();
    let graded = scheduler::grade_catching_panics(gateway.as_ref(), lease.id(), &submission).await;
    lease.release().await;

    graded.map(|verdict| verdict.result).ok_or(RunError::Panicked)
}
