use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentStatus},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/user/{user_id}", get(list_user_notifications))
        .route("/notifications/user/{user_id}/count", get(count_user_notifications))
}

/// An appointment decision as the patient sees it.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub appointment_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub appointment_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub chat_room_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

const NOTIFICATION_SELECT: &str = r#"
    SELECT ap.appointment_id, ap.user_id, u.username, ap.doctor_id, ap.doctor_name,
           ap.appointment_time, ap.status, ap.chat_room_id, ap.updated_at
    FROM appointment ap
    JOIN account u ON u.account_id = ap.user_id
"#;

#[derive(Debug, Serialize)]
pub struct NotificationsData {
    pub notifications: Vec<NotificationRow>,
}

#[derive(Debug, Serialize)]
pub struct CountData {
    pub count: i64,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<NotificationsData>>, ApiError> {
    auth.require_admin()?;

    let notifications = sqlx::query_as::<_, NotificationRow>(&format!(
        "{NOTIFICATION_SELECT} WHERE ap.status = $1 ORDER BY ap.updated_at DESC LIMIT 500"
    ))
    .bind(AppointmentStatus::Accepted)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(NotificationsData { notifications })))
}

pub async fn list_user_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<NotificationsData>>, ApiError> {
    auth.require_self_or_admin(user_id)?;

    let notifications = sqlx::query_as::<_, NotificationRow>(&format!(
        "{NOTIFICATION_SELECT} WHERE ap.user_id = $1 AND ap.status = $2 ORDER BY ap.updated_at DESC"
    ))
    .bind(user_id)
    .bind(AppointmentStatus::Accepted)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(NotificationsData { notifications })))
}

/// Decided appointments: accepted plus rejected.
pub async fn count_user_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<CountData>>, ApiError> {
    auth.require_self_or_admin(user_id)?;

    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE user_id = $1
          AND status IN ($2, $3)
        "#,
    )
    .bind(user_id)
    .bind(AppointmentStatus::Accepted)
    .bind(AppointmentStatus::Rejected)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(CountData { count })))
}
