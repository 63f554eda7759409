// REST API with Axum
//
// Each request opens its own SQLite connection on the blocking pool, so the
// database write lock (not a process-wide mutex) is what serializes
// competing open-register / open-shift calls.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::config::AppConfig;
use crate::db;
use crate::entities::{Actor, Register, Shift, ShiftTotals};
use crate::error::GuardError;
use crate::guard::{ClosedRegister, OpenedRegister, RegisterShiftGuard};
use crate::reports::{self, LowStockProduct};
use crate::store::SqliteStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        AppState {
            config: Arc::new(config),
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Guard(GuardError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Guard(GuardError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Guard(GuardError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Guard(GuardError::Invalid(_)) => StatusCode::BAD_REQUEST,
            ApiError::Guard(GuardError::Database(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Don't leak SQL details to the browser
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiResponse::<()>::err(message))).into_response()
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::Internal(format!("{:#}", err))
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run `f` against a fresh per-request guard on the blocking pool
async fn with_guard<T, F>(state: AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(RegisterShiftGuard<SqliteStore>) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = db::open_connection(&state.config.db_path, state.config.busy_timeout)
            .map_err(internal)?;
        let guard = RegisterShiftGuard::new(SqliteStore::from_connection(conn))
            .with_retry(state.config.retry);
        f(guard)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenRegisterRequest {
    pub actor: Actor,
    pub branch_id: i64,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: Actor,
}

#[derive(Debug, Deserialize)]
pub struct OpenShiftRequest {
    pub actor: Actor,
    pub register_id: i64,
    #[serde(default)]
    pub employee_id: Option<i64>,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CloseShiftRequest {
    pub actor: Actor,
    #[serde(default)]
    pub totals: Option<ShiftTotals>,
    /// Derive totals from the shift's sales and expenses; excludes `totals`
    #[serde(default)]
    pub compute_totals: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegistersQuery {
    pub branch_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<i64>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/registers - List registers (optionally by branch)
async fn get_registers(
    State(state): State<AppState>,
    Query(query): Query<RegistersQuery>,
) -> ApiResult<Vec<Register>> {
    let registers = with_guard(state, move |guard| {
        reports::list_registers(guard.store().connection(), query.branch_id).map_err(internal)
    })
    .await?;
    Ok(Json(ApiResponse::ok(registers)))
}

/// POST /api/registers - Open a new register in a branch
async fn open_register(
    State(state): State<AppState>,
    Json(req): Json<OpenRegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OpenedRegister>>), ApiError> {
    let opened = with_guard(state, move |guard| {
        Ok(guard.open_register(&req.actor, req.branch_id, &req.location)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(opened))))
}

/// POST /api/registers/:id/close - Close a register (and its open shift)
async fn close_register(
    State(state): State<AppState>,
    Path(register_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<ClosedRegister> {
    let closed = with_guard(state, move |guard| {
        Ok(guard.close_register(&req.actor, register_id)?)
    })
    .await?;
    Ok(Json(ApiResponse::ok(closed)))
}

/// POST /api/registers/:id/reopen - Reopen a closed register
async fn reopen_register(
    State(state): State<AppState>,
    Path(register_id): Path<i64>,
    Json(req): Json<ActorRequest>,
) -> ApiResult<OpenedRegister> {
    let opened = with_guard(state, move |guard| {
        Ok(guard.reopen_register(&req.actor, register_id)?)
    })
    .await?;
    Ok(Json(ApiResponse::ok(opened)))
}

/// GET /api/shifts/open - Shifts still running
async fn get_open_shifts(State(state): State<AppState>) -> ApiResult<Vec<Shift>> {
    let shifts = with_guard(state, |guard| {
        reports::open_shifts(guard.store().connection()).map_err(internal)
    })
    .await?;
    Ok(Json(ApiResponse::ok(shifts)))
}

/// POST /api/shifts - Open a shift on a register
async fn open_shift(
    State(state): State<AppState>,
    Json(req): Json<OpenShiftRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Shift>>), ApiError> {
    let shift = with_guard(state, move |guard| {
        Ok(guard.open_shift(&req.actor, req.register_id, req.employee_id, req.opened_at)?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(shift))))
}

/// POST /api/shifts/:id/close - Close a shift, optionally with totals
async fn close_shift(
    State(state): State<AppState>,
    Path(shift_id): Path<i64>,
    Json(req): Json<CloseShiftRequest>,
) -> ApiResult<Shift> {
    let shift = with_guard(state, move |guard| {
        let totals = match (req.compute_totals, req.totals) {
            (true, Some(_)) => {
                return Err(GuardError::Invalid(
                    "send either totals or compute_totals, not both".to_string(),
                )
                .into())
            }
            (true, None) => Some(reports::shift_totals(guard.store().connection(), shift_id)?),
            (false, totals) => totals,
        };
        Ok(guard.close_shift(&req.actor, shift_id, totals)?)
    })
    .await?;
    Ok(Json(ApiResponse::ok(shift)))
}

/// GET /api/shifts/:id/totals - Sales/expense totals for a shift
async fn get_shift_totals(
    State(state): State<AppState>,
    Path(shift_id): Path<i64>,
) -> ApiResult<ShiftTotals> {
    let totals = with_guard(state, move |guard| {
        Ok(reports::shift_totals(guard.store().connection(), shift_id)?)
    })
    .await?;
    Ok(Json(ApiResponse::ok(totals)))
}

/// GET /api/reports/low-stock - Products at or below the stock threshold
async fn get_low_stock(
    State(state): State<AppState>,
    Query(query): Query<LowStockQuery>,
) -> ApiResult<Vec<LowStockProduct>> {
    let threshold = query.threshold.unwrap_or(state.config.low_stock_threshold);
    let products = with_guard(state, move |guard| {
        reports::low_stock_products(guard.store().connection(), threshold).map_err(internal)
    })
    .await?;
    Ok(Json(ApiResponse::ok(products)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/registers", get(get_registers).post(open_register))
        .route("/registers/:id/close", post(close_register))
        .route("/registers/:id/reopen", post(reopen_register))
        .route("/shifts", post(open_shift))
        .route("/shifts/open", get(get_open_shifts))
        .route("/shifts/:id/close", post(close_shift))
        .route("/shifts/:id/totals", get(get_shift_totals))
        .route("/reports/low-stock", get(get_low_stock))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
