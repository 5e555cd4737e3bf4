//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ToolSource};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::llm::{LlmClient, OpenAiCompatClient};
use crate::result::WorkerResult;
use crate::task::TaskSpec;
use crate::tools::{FleetSnapshot, RemoteTool, ToolRegistry, KNOWN_TOOLS};
use crate::workers::{builtin_workers, WorkerDescriptor, WorkerRegistry};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
    /// Parent of every task's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

/// Build tools, completion client and workers from the config.
async fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let mut tools = ToolRegistry::new();
    match config.tool_source()? {
        ToolSource::Remote(base_url) => {
            RemoteTool::register_all(&mut tools, &base_url, &KNOWN_TOOLS, config.task_timeout())?;
        }
        ToolSource::Snapshot(path) => {
            Arc::new(FleetSnapshot::load(&path)?).register_tools(&mut tools);
        }
    }

    let llm: Arc<dyn LlmClient> = Arc::new(
        OpenAiCompatClient::new(
            config.llm_api_url.clone(),
            config.llm_api_key.clone(),
            config.llm_model.clone(),
        )
        .with_max_tokens(config.llm_max_tokens)
        .with_request_timeout(config.task_timeout()),
    );

    let registry = Arc::new(WorkerRegistry::new());
    for worker in builtin_workers() {
        registry.register(worker).await;
    }
    let uncovered = registry.uncovered_task_types().await;
    if !uncovered.is_empty() {
        tracing::warn!("No worker registered for task types: {:?}", uncovered);
    }

    Ok(Dispatcher::new(registry, Arc::new(tools), llm)
        .with_default_timeout(config.task_timeout())
        .with_max_tokens(Some(config.llm_max_tokens)))
}

/// Routes over an already-built state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/workers", get(list_workers))
        .route("/api/tasks", post(create_task))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(&config).await?;
    let addr = config.socket_addr()?;

    let state = Arc::new(AppState {
        config,
        dispatcher,
        shutdown: CancellationToken::new(),
    });
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, cancelling in-flight tasks");
            shutdown.cancel();
        })
        .await?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.dispatcher.registry();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: registry.len().await,
        uncovered_task_types: registry.uncovered_task_types().await,
    })
}

/// List registered workers, sorted by name.
async fn list_workers(State(state): State<Arc<AppState>>) -> Json<Vec<WorkerDescriptor>> {
    Json(state.dispatcher.registry().list().await)
}

/// Dispatch a task and wait for its result.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DispatchQuery>,
    Json(task): Json<TaskSpec>,
) -> Result<Json<WorkerResult>, (StatusCode, Json<ErrorResponse>)> {
    tracing::info!(
        "Received task {} ({}) for org {}",
        task.id,
        task.task_type,
        task.org_id
    );

    // Dropping the handler (client gone) drops the worker future with it.
    let cancel = state.shutdown.child_token();
    state
        .dispatcher
        .dispatch(&task, query.worker.as_deref(), cancel)
        .await
        .map(Json)
        .map_err(error_response)
}

fn error_response(err: DispatchError) -> (StatusCode, Json<ErrorResponse>) {
    use crate::workers::WorkerError;

    let (status, kind) = match &err {
        DispatchError::NoWorker(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_worker"),
        DispatchError::UnknownWorker(_) => (StatusCode::NOT_FOUND, "unknown_worker"),
        DispatchError::WorkerMismatch { .. } => (StatusCode::BAD_REQUEST, "worker_mismatch"),
        DispatchError::Worker { source, .. } => match source {
            WorkerError::InvalidTask(_) => (StatusCode::BAD_REQUEST, "invalid_task"),
            WorkerError::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            WorkerError::DeadlineExceeded { .. } => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            WorkerError::Tool { .. } => (StatusCode::BAD_GATEWAY, "tool_failed"),
            WorkerError::Completion(_) => (StatusCode::BAD_GATEWAY, "completion_failed"),
            WorkerError::InvalidPlan(_) | WorkerError::MissingPlan(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_result")
            }
        },
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: kind.to_string(),
        }),
    )
}
