use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{IssuedToken, hash_password, validate_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ACCOUNT_COLUMNS, AccountProfile, AccountRow, ApiOk, AppState, CreatedData, OkData, Role},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register/user", post(register_user))
        .route("/register/doctor", post(register_doctor))
        .route("/login/user", post(login_user))
        .route("/login/doctor", post(login_doctor))
        .route("/login/admin", post(login_admin))
        .route("/me", get(me))
        .route("/logout", post(logout))
        // Rotate access token for the current session (invalidates old token immediately)
        .route("/refresh", post(refresh))
}

/* -------------------------
   DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: String,
    pub age: i32,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDoctorRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub speciality: String,
    pub doc_id: String,
    pub years_of_experience: i32,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenData {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub account: AccountProfile,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub account: AccountProfile,
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RefreshData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub session_token_id: Uuid,
}

/* -------------------------
   Validation
--------------------------*/

pub(crate) fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(ApiError::validation("email is not valid"));
    }
    Ok(email)
}

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

fn map_insert_error(e: sqlx::Error) -> ApiError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ApiError::Conflict("EMAIL_TAKEN", "an account with this email already exists".into())
        }
        _ => ApiError::db(e),
    }
}

/* -------------------------
   Sessions
--------------------------*/

async fn open_session(state: &AppState, account_id: Uuid) -> Result<(IssuedToken, DateTime<Utc>), ApiError> {
    let issued = IssuedToken::generate();
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO session_token (session_token_id, account_id, session_token_hash, expires_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(&issued.hash)
    .bind(expires_at)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok((issued, expires_at))
}

pub(crate) async fn load_account(state: &AppState, account_id: Uuid) -> Result<Option<AccountRow>, ApiError> {
    sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM account WHERE account_id = $1"
    ))
    .bind(account_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

/* -------------------------
   Registration
--------------------------*/

pub async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<Json<ApiOk<CreatedData>>, ApiError> {
    let name = required("name", &req.name)?;
    let username = required("username", &req.username)?;
    let gender = required("gender", &req.gender)?;
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    if !(0..=150).contains(&req.age) {
        return Err(ApiError::validation("age must be between 0 and 150"));
    }

    let password_hash = hash_password(&req.password)?;
    let account_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO account (account_id, role, name, username, email, password_hash, gender, age)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(account_id)
    .bind(Role::Patient)
    .bind(name)
    .bind(username)
    .bind(&email)
    .bind(password_hash)
    .bind(gender)
    .bind(req.age)
    .execute(&state.db)
    .await
    .map_err(map_insert_error)?;

    tracing::info!(%account_id, "patient registered");
    Ok(Json(ApiOk::new(CreatedData { id: account_id })))
}

/// Registration logs the doctor straight in.
pub async fn register_doctor(
    State(state): State<AppState>,
    Json(req): Json<RegisterDoctorRequest>,
) -> Result<Json<ApiOk<TokenData>>, ApiError> {
    let name = required("name", &req.name)?;
    let username = required("username", &req.username)?;
    let speciality = required("speciality", &req.speciality)?;
    let doc_id = required("doc_id", &req.doc_id)?;
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    if req.years_of_experience < 0 {
        return Err(ApiError::validation("years_of_experience must not be negative"));
    }

    let password_hash = hash_password(&req.password)?;
    let account_id = Uuid::new_v4();

    let account: AccountRow = sqlx::query_as::<_, AccountRow>(&format!(
        r#"
        INSERT INTO account
            (account_id, role, name, username, email, password_hash, speciality, license_id, years_of_experience)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(account_id)
    .bind(Role::Doctor)
    .bind(name)
    .bind(username)
    .bind(&email)
    .bind(password_hash)
    .bind(speciality)
    .bind(doc_id)
    .bind(req.years_of_experience)
    .fetch_one(&state.db)
    .await
    .map_err(map_insert_error)?;

    let (issued, expires_at) = open_session(&state, account.account_id).await?;
    tracing::info!(%account_id, "doctor registered");

    Ok(Json(ApiOk::new(TokenData {
        access_token: issued.token,
        token_type: "bearer",
        expires_at,
        account: account.into(),
    })))
}

/* -------------------------
   Login / logout
--------------------------*/

async fn login_as(state: &AppState, req: &LoginRequest, role: Role) -> Result<TokenData, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let account: AccountRow = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM account WHERE email = $1"
    ))
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    // wrong portal looks the same as a wrong password
    if account.role != role || !verify_password(&req.password, &account.password_hash) {
        return Err(ApiError::invalid_credentials());
    }
    if !account.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    let (issued, expires_at) = open_session(state, account.account_id).await?;
    tracing::info!(account_id = %account.account_id, role = role.as_str(), "login");

    Ok(TokenData {
        access_token: issued.token,
        token_type: "bearer",
        expires_at,
        account: account.into(),
    })
}

pub async fn login_user(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<TokenData>>, ApiError> {
    Ok(Json(ApiOk::new(login_as(&state, &req, Role::Patient).await?)))
}

pub async fn login_doctor(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<TokenData>>, ApiError> {
    Ok(Json(ApiOk::new(login_as(&state, &req, Role::Doctor).await?)))
}

pub async fn login_admin(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<TokenData>>, ApiError> {
    Ok(Json(ApiOk::new(login_as(&state, &req, Role::Admin).await?)))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let account = load_account(&state, auth.account_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        SELECT expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(MeData {
        account: account.into(),
        session_token_id: auth.session_token_id,
        expires_at,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND account_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.account_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkData::message("Logout successful")))
}

/// POST /api/v1/auth/refresh
/// Same session, new token; the old token stops working immediately.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<RefreshData>>, ApiError> {
    let issued = IssuedToken::generate();

    let expires_at: DateTime<Utc> = sqlx::query_scalar(
        r#"
        UPDATE session_token
        SET session_token_hash = $1,
            last_seen_at = now()
        WHERE session_token_id = $2
          AND account_id = $3
          AND revoked_at IS NULL
          AND expires_at > now()
        RETURNING expires_at
        "#,
    )
    .bind(&issued.hash)
    .bind(auth.session_token_id)
    .bind(auth.account_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(RefreshData {
        access_token: issued.token,
        expires_at,
        session_token_id: auth.session_token_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM ").unwrap(), "ada@example.com");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "ada", "@example.com", "ada@example", "ada@.com", "a da@example.com"] {
            assert!(normalize_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn required_fields_are_trimmed() {
        assert_eq!(required("name", "  Ada ").unwrap(), "Ada");
        assert!(required("name", "   ").is_err());
    }
}
