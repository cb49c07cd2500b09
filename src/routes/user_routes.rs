use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ACCOUNT_COLUMNS, AccountProfile, AccountRow, ApiOk, AppState, OkData, Role},
};

#[derive(Debug, Serialize)]
pub struct UsersListData {
    pub users: Vec<AccountProfile>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/v1/users
        .route("/", get(list_users))
        // /api/v1/users/{user_id}
        .route("/{user_id}", get(get_user))
        // /api/v1/users/{user_id}/disable
        .route("/{user_id}/disable", post(disable_user))
        // /api/v1/users/{user_id}/enable
        .route("/{user_id}/enable", post(enable_user))
}

/// Admins see every patient; a doctor sees the patients they have appointments with.
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UsersListData>>, ApiError> {
    let rows: Vec<AccountRow> = match auth.role {
        Role::Admin => sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM account
            WHERE role = $1
            ORDER BY created_at DESC
            LIMIT 500
            "#
        ))
        .bind(Role::Patient)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?,

        Role::Doctor => sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
            FROM account
            WHERE role = $1
              AND account_id IN (SELECT user_id FROM appointment WHERE doctor_id = $2)
            ORDER BY name
            "#
        ))
        .bind(Role::Patient)
        .bind(auth.account_id)
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?,

        Role::Patient => {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "patients cannot list users".into(),
            ));
        }
    };

    Ok(Json(ApiOk::new(UsersListData {
        users: rows.into_iter().map(AccountProfile::from).collect(),
    })))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<AccountProfile>>, ApiError> {
    auth.require_patient_access(&state.db, user_id).await?;

    let user: AccountRow = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM account WHERE account_id = $1 AND role = $2"
    ))
    .bind(user_id)
    .bind(Role::Patient)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("user"))?;

    Ok(Json(ApiOk::new(user.into())))
}

async fn set_active(state: &AppState, account_id: Uuid, active: bool) -> Result<(), ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let res = sqlx::query(
        r#"
        UPDATE account
        SET is_active = $1
        WHERE account_id = $2
          AND role <> $3
        "#,
    )
    .bind(active)
    .bind(account_id)
    .bind(Role::Admin)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("account"));
    }

    if !active {
        // disabled accounts lose their live sessions too
        sqlx::query(
            r#"
            UPDATE session_token
            SET revoked_at = now()
            WHERE account_id = $1
              AND revoked_at IS NULL
            "#,
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;
    Ok(())
}

pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require_admin()?;
    set_active(&state, account_id, false).await?;
    tracing::info!(%account_id, by = %auth.account_id, "account disabled");
    Ok(Json(OkData::message("Account disabled")))
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(account_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.require_admin()?;
    set_active(&state, account_id, true).await?;
    tracing::info!(%account_id, by = %auth.account_id, "account enabled");
    Ok(Json(OkData::message("Account enabled")))
}
