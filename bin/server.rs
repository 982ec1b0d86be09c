// Roster Reconcile - HTTP trigger
// One POST runs one invocation; overlapping invocations are refused.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use roster_reconcile::{
    audit, get_all_employees, AuditEntry, AuthoritativeRecord, Config, LocalObjectStore,
    LogAlertChannel, Orchestrator, ProcessResult, ReconcileError, Warehouse,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// Held for the whole of an invocation
    run_lock: Arc<Mutex<()>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<Option<()>> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/runs - Run one invocation
async fn trigger_run(State(state): State<AppState>) -> impl IntoResponse {
    let Ok(guard) = state.run_lock.clone().try_lock_owned() else {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::err("a reconciliation run is already in progress")),
        )
            .into_response();
    };

    let config = state.config.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        let store = LocalObjectStore::new(&config.store.root);
        let alerts = LogAlertChannel;
        Orchestrator::new(&config, &store, &alerts).run()
    })
    .await;

    match joined {
        Ok(result) => {
            let status = StatusCode::from_u16(result.status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ApiResponse::<ProcessResult>::ok(result))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "reconciliation task aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(format!("run aborted: {}", e))),
            )
                .into_response()
        }
    }
}

/// GET /api/ledger - Audit ledger, oldest first
async fn get_ledger(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.clone();
    let loaded = tokio::task::spawn_blocking(move || -> Result<Vec<AuditEntry>, ReconcileError> {
        let warehouse = Warehouse::open(&config.warehouse.path)?;
        audit::entries(warehouse.connection())
    })
    .await;

    respond(loaded)
}

/// GET /api/employees - Authoritative records
async fn get_employees(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.clone();
    let loaded =
        tokio::task::spawn_blocking(move || -> Result<Vec<AuthoritativeRecord>, ReconcileError> {
            let warehouse = Warehouse::open(&config.warehouse.path)?;
            get_all_employees(warehouse.connection())
        })
        .await;

    respond(loaded)
}

fn respond<T: Serialize>(
    loaded: Result<Result<T, ReconcileError>, tokio::task::JoinError>,
) -> axum::response::Response {
    match loaded {
        Ok(Ok(data)) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "warehouse query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::err(e.to_string())),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::err(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::var_os("ROSTER_CONFIG").map(std::path::PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    let state = AppState {
        config: Arc::new(config),
        run_lock: Arc::new(Mutex::new(())),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/runs", post(trigger_run))
        .route("/ledger", get(get_ledger))
        .route("/employees", get(get_employees))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = std::env::var("ROSTER_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(%addr, "roster-server listening");

    axum::serve(listener, app).await.context("server crashed")?;

    Ok(())
}
