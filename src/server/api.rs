//! REST API handlers for the dispatch server

use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchError;
use crate::metrics;
use crate::models::{AssignOutcome, AssignRequest, Booking, GeoPoint, Helper, NewHelper, Receipt};

use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code: code.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_escalations: usize,
}

/// Completion request body
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub rating: f64,
}

/// Query string of the helper listing
#[derive(Debug, Default, Deserialize)]
pub struct HelpersQuery {
    #[serde(default)]
    pub available: Option<bool>,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Handler error carrying an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::new("INVALID_REQUEST", message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let status = match &err {
            DispatchError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::ClaimConflict { .. }
            | DispatchError::InvalidState { .. }
            | DispatchError::NoEligibleHelpers => StatusCode::CONFLICT,
            DispatchError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "Request failed");
            "Internal error, please retry".to_string()
        } else {
            err.to_string()
        };

        Self {
            status,
            body: ErrorResponse::new(err.code(), message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        // Booking endpoints
        .route("/api/bookings", post(assign_helper))
        .route("/api/bookings/{id}", get(get_booking))
        .route("/api/bookings/{id}/complete", post(complete_booking))
        // Helper endpoints
        .route("/api/helpers", get(list_helpers).post(register_helper))
        .route("/api/helpers/{id}/location", put(update_helper_location))
        // Prometheus
        .route("/metrics", get(metrics_text))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Record request count and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_escalations: state.dispatcher.active_escalations(),
    }))
}

async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// Booking Handlers
// ============================================================================

/// Assign a helper; `no-helpers` is a successful response
async fn assign_helper(
    State(state): State<AppState>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<AssignOutcome> {
    let Json(request) = body?;
    let outcome = state.dispatcher.assign_helper(&request).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Booking> {
    let booking = state.dispatcher.get_booking(&id).await?;
    Ok(Json(ApiResponse::success(booking)))
}

async fn complete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CompleteRequest>, JsonRejection>,
) -> ApiResult<Receipt> {
    let Json(request) = body?;
    let receipt = state.dispatcher.complete_booking(&id, request.rating).await?;
    Ok(Json(ApiResponse::success(receipt)))
}

// ============================================================================
// Helper Handlers
// ============================================================================

async fn list_helpers(
    State(state): State<AppState>,
    Query(query): Query<HelpersQuery>,
) -> ApiResult<Vec<Helper>> {
    let helpers = state
        .dispatcher
        .list_helpers(query.available.unwrap_or(false))
        .await?;
    Ok(Json(ApiResponse::success(helpers)))
}

async fn register_helper(
    State(state): State<AppState>,
    body: Result<Json<NewHelper>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Helper>>), ApiError> {
    let Json(request) = body?;
    let helper = state.dispatcher.register_helper(request.into()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(helper))))
}

async fn update_helper_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<GeoPoint>, JsonRejection>,
) -> ApiResult<Receipt> {
    let Json(location) = body?;
    let receipt = state.dispatcher.update_helper_location(&id, location).await?;
    Ok(Json(ApiResponse::success(receipt)))
}
