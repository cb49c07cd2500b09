use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
    outbreak::detector::{self, ALERT_COLUMNS, ClusterView, OutbreakAlertRow, ScanReport},
};

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/v1/outbreaks/alerts
        .route("/alerts", get(list_alerts))
        .route("/alerts/{alert_id}/resolve", post(resolve_alert))
        .route("/scan", post(scan))
        .route("/clusters", get(clusters))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub open: Option<bool>,
    pub disease: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AlertsData {
    pub alerts: Vec<OutbreakAlertRow>,
}

#[derive(Debug, Serialize)]
pub struct ScanData {
    pub reports: Vec<ScanReport>,
}

#[derive(Debug, Deserialize)]
pub struct ClustersQuery {
    pub disease: String,
}

#[derive(Debug, Serialize)]
pub struct ClustersData {
    pub disease: String,
    pub events: usize,
    pub radius_km: f64,
    pub min_cases: usize,
    pub window_days: i64,
    pub clusters: Vec<ClusterView>,
}

pub async fn list_alerts(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AlertsQuery>,
) -> Result<Json<ApiOk<AlertsData>>, ApiError> {
    auth.require_admin()?;

    let open_only = q.open.unwrap_or(false);
    let disease = q
        .disease
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let alerts = sqlx::query_as::<_, OutbreakAlertRow>(&format!(
        r#"
        SELECT {ALERT_COLUMNS}
        FROM outbreak_alert
        WHERE (NOT $1 OR resolved_at IS NULL)
          AND ($2::text IS NULL OR disease = $2)
        ORDER BY raised_at DESC
        LIMIT 500
        "#
    ))
    .bind(open_only)
    .bind(disease)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(AlertsData { alerts })))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<ApiOk<OutbreakAlertRow>>, ApiError> {
    auth.require_admin()?;

    let alert = sqlx::query_as::<_, OutbreakAlertRow>(&format!(
        r#"
        UPDATE outbreak_alert
        SET resolved_at = COALESCE(resolved_at, now()),
            updated_at = now()
        WHERE alert_id = $1
        RETURNING {ALERT_COLUMNS}
        "#
    ))
    .bind(alert_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("outbreak alert"))?;

    tracing::info!(%alert_id, by = %auth.account_id, "outbreak alert resolved");
    Ok(Json(ApiOk::new(alert)))
}

pub async fn scan(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ScanData>>, ApiError> {
    auth.require_admin()?;
    let reports = detector::scan_all(&state.db, &state.outbreak).await?;
    Ok(Json(ApiOk::new(ScanData { reports })))
}

/// Clusters as they stand now; nothing is raised.
pub async fn clusters(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ClustersQuery>,
) -> Result<Json<ApiOk<ClustersData>>, ApiError> {
    auth.require_admin()?;

    let disease = q.disease.trim();
    if disease.is_empty() {
        return Err(ApiError::validation("disease is required"));
    }

    let cfg = state.outbreak;
    let (events, clusters) = detector::current_clusters(&state.db, &cfg, disease, Utc::now()).await?;

    Ok(Json(ApiOk::new(ClustersData {
        disease: disease.to_string(),
        events,
        radius_km: cfg.radius_km,
        min_cases: cfg.min_cases,
        window_days: cfg.window_days,
        clusters: clusters.iter().map(ClusterView::from).collect(),
    })))
}
