//! HTTP API server.
//!
//! Routes:
//! - `POST {push_uri}`: dispatch a batch of notifications.
//! - `GET {stat_app_uri}`: queue and per-platform counters.
//! - `GET {metric_uri}`: Prometheus exposition.
//! - `GET|HEAD {health_uri}`: liveness.
//! - `GET /version`, `GET /`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ApiConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::push::{LogPushEntry, Platform, RequestPush};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error body for rejected requests.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct ErrorResponse {
    code: u16,
    message: String,
}

/// Body of a successful push.
#[derive(Debug, Serialize)]
struct PushResponse {
    success: &'static str,
    counts: usize,
    logs: Vec<LogPushEntry>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct PlatformStats {
    push_success: u64,
    push_error: u64,
}

/// Body of the app status endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct AppStatus {
    version: String,
    busy_workers: usize,
    success_tasks: u64,
    failure_tasks: u64,
    submitted_tasks: u64,
    total_count: u64,
    ios: PlatformStats,
    android: PlatformStats,
    huawei: PlatformStats,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct VersionResponse {
    source: String,
    version: String,
}

/// Shared state for API handlers.
struct ApiState {
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    max_notification: usize,
    /// Parent of every request's cancellation token.
    shutdown: CancellationToken,
}

/// Push gateway HTTP server.
pub struct ApiServer {
    config: ApiConfig,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    max_notification: usize,
}

impl ApiServer {
    pub fn new(
        config: ApiConfig,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        max_notification: usize,
    ) -> Self {
        Self {
            config,
            dispatcher,
            metrics,
            max_notification,
        }
    }

    /// Build the router. In-flight dispatches are released when `shutdown`
    /// is cancelled.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = Arc::new(ApiState {
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
            max_notification: self.max_notification,
            shutdown: shutdown.clone(),
        });

        Router::new()
            .route("/", get(root_handler))
            .route("/version", get(version_handler))
            .route(&self.config.health_uri, get(health_handler))
            .route(&self.config.push_uri, post(push_handler))
            .route(&self.config.stat_app_uri, get(app_status_handler))
            .route(&self.config.metric_uri, get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on `listener` until `shutdown` is cancelled.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let app = self.router(shutdown.clone());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("API server shutting down");
            })
            .await?;

        Ok(())
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "API server listening");
        self.serve(listener, shutdown).await
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "text": "Welcome to notification server." }))
}

async fn version_handler() -> impl IntoResponse {
    Json(VersionResponse {
        source: env!("CARGO_PKG_NAME").to_string(),
        version: VERSION.to_string(),
    })
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn push_handler(
    State(state): State<Arc<ApiState>>,
    payload: std::result::Result<Json<RequestPush>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected push body");
            return error_response(StatusCode::BAD_REQUEST, "Missing notifications field.");
        }
    };

    if let Err(e) = request.validate(state.max_notification) {
        debug!(error = %e, "Rejected push request");
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    // The dispatch outlives this handler; a dropped handler (client gone)
    // cancels the token and releases the dispatch's wait.
    let cancel = state.shutdown.child_token();
    let _guard = cancel.clone().drop_guard();

    let dispatcher = state.dispatcher.clone();
    let handle = tokio::spawn(async move { dispatcher.dispatch(request, cancel).await });

    let result = match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Dispatch task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Dispatch failed.");
        }
    };

    Json(PushResponse {
        success: "ok",
        counts: result.count,
        logs: result.logs,
    })
    .into_response()
}

async fn app_status_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let queue = state.dispatcher.queue().stats();
    let platform = |p: Platform| PlatformStats {
        push_success: state.metrics.success(p),
        push_error: state.metrics.error(p),
    };

    Json(AppStatus {
        version: VERSION.to_string(),
        busy_workers: queue.busy_workers,
        success_tasks: queue.success_tasks,
        failure_tasks: queue.failure_tasks,
        submitted_tasks: queue.submitted_tasks,
        total_count: state.metrics.total(),
        ios: platform(Platform::Ios),
        android: platform(Platform::Android),
        huawei: platform(Platform::Huawei),
    })
}

async fn metrics_handler(State(state): State<Arc<ApiState>>) -> Response {
    state
        .metrics
        .observe_queue(&state.dispatcher.queue().stats());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.metrics.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
