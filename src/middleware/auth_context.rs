use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn require(&self, role: Role) -> Result<(), ApiError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                format!("only a {} may do this", role.as_str()),
            ))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        self.require(Role::Admin)
    }

    /// The caller acts on their own account, or is an admin.
    pub fn require_self_or_admin(&self, account_id: Uuid) -> Result<(), ApiError> {
        if self.is_admin() || self.account_id == account_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                "you can only access your own data".into(),
            ))
        }
    }

    /// Patient data is visible to the patient, admins, and any doctor
    /// holding an appointment with that patient.
    pub async fn require_patient_access(
        &self,
        db: &sqlx::PgPool,
        patient_id: Uuid,
    ) -> Result<(), ApiError> {
        if self.is_admin() || self.account_id == patient_id {
            return Ok(());
        }
        if self.is_doctor() {
            let treating: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM appointment
                    WHERE doctor_id = $1 AND user_id = $2
                )
                "#,
            )
            .bind(self.account_id)
            .bind(patient_id)
            .fetch_one(db)
            .await
            .map_err(ApiError::db)?;

            if treating {
                return Ok(());
            }
        }
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you have no access to this patient's data".into(),
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    account_id: Uuid,
    role: Role,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.account_id, a.role
                FROM session_token st
                JOIN account a ON a.account_id = st.account_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND a.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            // best-effort
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            Ok(AuthContext {
                account_id: row.account_id,
                role: row.role,
                session_token_id: row.session_token_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            account_id: Uuid::new_v4(),
            role,
            session_token_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn self_or_admin_gate() {
        let patient = ctx(Role::Patient);
        assert!(patient.require_self_or_admin(patient.account_id).is_ok());
        assert!(patient.require_self_or_admin(Uuid::new_v4()).is_err());
        assert!(ctx(Role::Admin).require_self_or_admin(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn role_requirement() {
        assert!(ctx(Role::Doctor).require(Role::Doctor).is_ok());
        assert!(ctx(Role::Patient).require(Role::Doctor).is_err());
        assert!(ctx(Role::Doctor).require_admin().is_err());
    }
}
