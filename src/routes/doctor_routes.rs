use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ACCOUNT_COLUMNS, AccountProfile, AccountRow, ApiOk, AppState, OkData, Role},
    routes::{
        auth_routes::load_account,
        chat_routes::{purge_rooms, remove_files},
    },
};

#[derive(Debug, Deserialize)]
pub struct DoctorListQuery {
    pub speciality: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DoctorsListData {
    pub doctors: Vec<AccountProfile>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors))
        .route("/doctors/{doctor_id}", get(get_doctor).delete(delete_doctor))
        // the calling doctor
        .route("/doctor", get(current_doctor))
}

pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<DoctorListQuery>,
) -> Result<Json<ApiOk<DoctorsListData>>, ApiError> {
    let speciality = q
        .speciality
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let rows: Vec<AccountRow> = sqlx::query_as::<_, AccountRow>(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM account
        WHERE role = $1
          AND is_active = true
          AND ($2::text IS NULL OR lower(speciality) = lower($2))
        ORDER BY name
        "#
    ))
    .bind(Role::Doctor)
    .bind(speciality)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(DoctorsListData {
        doctors: rows.into_iter().map(AccountProfile::from).collect(),
    })))
}

pub(crate) async fn find_doctor(state: &AppState, doctor_id: Uuid) -> Result<Option<AccountRow>, ApiError> {
    Ok(load_account(state, doctor_id)
        .await?
        .filter(|a| a.role == Role::Doctor))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<AccountProfile>>, ApiError> {
    let doctor = find_doctor(&state, doctor_id)
        .await?
        .ok_or_else(|| ApiError::not_found("doctor"))?;
    Ok(Json(ApiOk::new(doctor.into())))
}

pub async fn current_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<AccountProfile>>, ApiError> {
    auth.require(Role::Doctor)?;
    let doctor = find_doctor(&state, auth.account_id)
        .await?
        .ok_or_else(|| ApiError::not_found("doctor"))?;
    Ok(Json(ApiOk::new(doctor.into())))
}

/// A doctor may only delete their own account. Sessions, appointments and
/// prescriptions go with it, as do the chat rooms of those appointments.
pub async fn delete_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require(Role::Doctor)?;

    if find_doctor(&state, doctor_id).await?.is_none() {
        return Err(ApiError::not_found("doctor"));
    }
    if auth.account_id != doctor_id {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you can only delete your own account".into(),
        ));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let rooms: Vec<String> = sqlx::query_scalar(
        "SELECT chat_room_id FROM appointment WHERE doctor_id = $1 AND chat_room_id IS NOT NULL",
    )
    .bind(doctor_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    let stale_files = purge_rooms(&mut *tx, &rooms).await?;

    sqlx::query("DELETE FROM account WHERE account_id = $1 AND role = $2")
        .bind(doctor_id)
        .bind(Role::Doctor)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    remove_files(&state.attachments, &stale_files).await;

    tracing::info!(%doctor_id, "doctor account deleted");
    Ok(Json(OkData::message("Doctor deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::storage::StorageError;

    #[tokio::test]
    async fn deleting_a_doctor_clears_their_chat_rooms() {
        let Some(pool) = testing::pool().await else {
            return;
        };
        let dir = std::env::temp_dir().join(format!("telehealth-doctor-{}", Uuid::new_v4()));
        let state = testing::state(pool.clone(), &dir);
        let patient = testing::account(&pool, Role::Patient).await;
        let doctor = testing::account(&pool, Role::Doctor).await;
        let (_, room_id, key) = testing::accepted_appointment_with_file(&state, patient, doctor).await;

        let auth = AuthContext {
            account_id: doctor,
            role: Role::Doctor,
            session_token_id: Uuid::new_v4(),
        };
        delete_doctor(State(state.clone()), auth, Path(doctor)).await.unwrap();

        assert_eq!(testing::room_rows(&pool, &room_id).await, (0, 0));
        assert!(matches!(state.attachments.read(&key).await, Err(StorageError::NotFound)));
        assert!(find_doctor(&state, doctor).await.unwrap().is_none());

        testing::drop_accounts(&pool, &[patient]).await;
        std::fs::remove_dir_all(dir).ok();
    }
}
