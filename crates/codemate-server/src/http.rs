use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use codemate_core::types::now_ts;
use codemate_core::{GatewayError, TaskCreateRequest, TaskSnapshot};

use crate::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("codemate gateway listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/tasks", get(list_tasks).post(create_task))
        .route("/v1/tasks/{task_id}", get(get_task))
        .route("/v1/tasks/{task_id}/approve", post(approve_task))
        .route("/v1/tasks/{task_id}/deny", post(deny_task))
        .route("/v1/tasks/{task_id}/cancel", post(cancel_task))
        .route("/v1/tasks/{task_id}/events", get(task_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 4xx/5xx response carrying `{"detail": ...}`.
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.detail}))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::TaskNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "Task not found")
            }
            GatewayError::NoPendingApproval => {
                ApiError::new(StatusCode::CONFLICT, "No step awaiting approval")
            }
            GatewayError::Validation(detail) => ApiError::new(StatusCode::BAD_REQUEST, detail),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true, "service": "codemate_gateway", "time": now_ts()}))
}

#[derive(Debug, Deserialize, Default)]
struct ListTasksQuery {
    limit: Option<usize>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "limit must be between 1 and 100",
        ));
    }
    let tasks = state.store.list_tasks(limit).await?;
    Ok(Json(json!({"tasks": tasks})))
}

async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCreateRequest>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    req.validate()?;
    Ok(Json(state.engine.create_task(&req).await?))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    Ok(Json(state.store.snapshot(&task_id).await?))
}

async fn approve_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    Ok(Json(state.engine.approve(&task_id).await?))
}

#[derive(Debug, Deserialize, Default)]
struct DenyBody {
    #[serde(default)]
    reason: String,
}

async fn deny_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<DenyBody>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let reason = body.reason.trim();
    let reason = if reason.is_empty() {
        "Denied by user"
    } else {
        reason
    };
    Ok(Json(state.engine.deny(&task_id, reason).await?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    Ok(Json(state.engine.cancel(&task_id).await?))
}

/// SSE stream for one task: a synthesized snapshot frame first, then hub
/// events until the client disconnects. Subscription happens before the
/// snapshot read, so the stream may repeat events already in the snapshot;
/// clients dedupe by event id.
async fn task_events(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    state
        .store
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Task not found"))?;

    let rx = state.hub.subscribe(&task_id);
    let snapshot = state.store.snapshot(&task_id).await?;

    let initial = tokio_stream::once(Ok::<_, Infallible>(Event::default().data(
        serde_json::to_string(&json!({"event_type": "snapshot", "payload": snapshot}))
            .unwrap_or_default(),
    )));
    let live = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => Some(Ok(Event::default()
            .data(serde_json::to_string(&event).unwrap_or_default()))),
        // A lagged subscriber loses only its own backlog; it reconciles
        // from the snapshot it already holds.
        Err(_) => None,
    });

    let sse = Sse::new(initial.chain(live))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(10)));
    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    Ok(response)
}

// ============================================================================
// Tests
// ============================================================================
