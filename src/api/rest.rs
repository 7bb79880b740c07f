//! REST API Handlers
//!
//! Operator endpoints: health, metrics, alerts, backups and migrations.

use crate::backup::BackupService;
use crate::domain::AlertSeverity;
use crate::error::{Error, ErrorKind};
use crate::manager::StorageManager;
use crate::migration::MigrationService;
use crate::monitoring::HealthStatus;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Default page size for metric and alert listings
const DEFAULT_LIST_LIMIT: u32 = 100;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Restore request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreBackupRequest {
    /// Backup location as returned when the backup was created
    pub location: String,
}

/// Migration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateTenantRequest {
    pub old_tenant_id: String,
    pub new_tenant_id: String,
}

/// `GET /v1/metrics` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsQuery {
    pub name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// `GET /v1/alerts` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsQuery {
    /// Minimum severity: info, warning, error, critical
    pub severity: Option<String>,
    pub limit: Option<u32>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn status_for(err: &Error) -> StatusCode {
        match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Consistency => StatusCode::CONFLICT,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map a storage error onto a status code and JSON body
fn error_response(operation: &str, err: Error) -> Response {
    let status = ApiErrorResponse::status_for(&err);
    if status.is_server_error() {
        error!(operation, error = %err, "Request failed");
    } else {
        warn!(operation, error = %err, "Request rejected");
    }
    (
        status,
        Json(ApiErrorResponse {
            error: err.label().into(),
            message: err.to_string(),
            details: Some(operation.to_string()),
        }),
    )
        .into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    manager: StorageManager,
}

impl RestRouter {
    pub fn new(manager: StorageManager) -> Self {
        Self { manager }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            backups: BackupService::new(self.manager.clone()),
            migrations: MigrationService::new(self.manager.clone()),
            manager: self.manager,
        };

        Router::new()
            // Monitoring endpoints
            .route("/v1/health", get(system_health))
            .route("/v1/metrics", get(list_metrics))
            .route("/v1/alerts", get(list_alerts))
            // Backup endpoints
            .route(
                "/v1/tenants/:id/backups",
                get(list_backups).post(create_backup),
            )
            .route("/v1/tenants/:id/backups/restore", post(restore_backup))
            // Migration endpoints
            .route("/v1/migrations", post(migrate_tenant))
            .route("/v1/migrations/:old/:new", get(verify_migration))
            // Process endpoints
            .route("/metrics", get(prometheus_metrics))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    manager: StorageManager,
    backups: BackupService,
    migrations: MigrationService,
}

// =============================================================================
// Monitoring Handlers
// =============================================================================

/// Run every probe; degraded systems answer 503 with the same body
async fn system_health(State(state): State<AppState>) -> Response {
    let health = state.manager.monitoring().check_system_health().await;
    let status = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health)).into_response()
}

async fn list_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    match state
        .manager
        .monitoring()
        .get_metrics(query.name.as_deref(), query.since, limit)
        .await
    {
        Ok(samples) => (StatusCode::OK, Json(samples)).into_response(),
        Err(e) => error_response("list_metrics", e),
    }
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let severity = match query.severity.as_deref().map(str::parse::<AlertSeverity>) {
        Some(Err(e)) => return error_response("list_alerts", e),
        Some(Ok(severity)) => Some(severity),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);

    match state.manager.monitoring().get_alerts(severity, limit).await {
        Ok(alerts) => (StatusCode::OK, Json(alerts)).into_response(),
        Err(e) => error_response("list_alerts", e),
    }
}

/// Prometheus text exposition
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match state.manager.monitoring().render_prometheus() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error_response("render_metrics", e),
    }
}

// =============================================================================
// Backup Handlers
// =============================================================================

async fn list_backups(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.backups.list_backups(&id).await {
        Ok(backups) => (StatusCode::OK, Json(backups)).into_response(),
        Err(e) => error_response("list_backups", e),
    }
}

async fn create_backup(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!("Creating backup for tenant {}", id);
    match state.backups.create_backup(&id).await {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => error_response("create_backup", e),
    }
}

async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RestoreBackupRequest>,
) -> Response {
    info!("Restoring tenant {} from {}", id, request.location);
    match state.backups.restore_backup(&id, &request.location).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response("restore_backup", e),
    }
}

// =============================================================================
// Migration Handlers
// =============================================================================

async fn migrate_tenant(
    State(state): State<AppState>,
    Json(request): Json<MigrateTenantRequest>,
) -> Response {
    info!(
        "Migrating tenant {} to {}",
        request.old_tenant_id, request.new_tenant_id
    );
    match state
        .migrations
        .migrate_guild_data(&request.old_tenant_id, &request.new_tenant_id)
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => error_response("migrate_tenant", e),
    }
}

async fn verify_migration(
    State(state): State<AppState>,
    Path((old, new)): Path<(String, String)>,
) -> Response {
    match state.migrations.verify_migration(&old, &new).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response("verify_migration", e),
    }
}

// =============================================================================
// Process Handlers
// =============================================================================

/// Liveness
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once the durable store answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.durable().ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "database unavailable"),
    }
}
