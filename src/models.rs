use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::OutbreakConfig;
use crate::prediction::registry::ModelRegistry;
use crate::storage::AttachmentStore;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub models: Arc<ModelRegistry>,
    pub completion: Arc<dyn CompletionClient>,
    pub attachments: AttachmentStore,
    pub outbreak: OutbreakConfig,
}

/* -------------------------
   Envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
    pub message: String,
}

impl OkData {
    pub fn message(message: impl Into<String>) -> ApiOk<OkData> {
        ApiOk::new(OkData {
            ok: true,
            message: message.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedData {
    pub id: Uuid,
}

/* -------------------------
   Roles
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Doctor = 1,
    Admin = 2,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }
}

/* -------------------------
   Appointment lifecycle
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Accepted = 1,
    Rejected = 2,
    Cancelled = 3,
    Completed = 4,
}

impl AppointmentStatus {
    /// pending -> accepted | rejected | cancelled
    /// accepted -> completed | cancelled
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Completed)
                | (Accepted, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Accepted => "accepted",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }
}

pub fn chat_room_id_for(appointment_id: Uuid) -> String {
    format!("chat-{appointment_id}")
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub role: Role,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub gender: Option<String>,
    pub age: Option<i32>,
    pub speciality: Option<String>,
    pub license_id: Option<String>,
    pub years_of_experience: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

pub const ACCOUNT_COLUMNS: &str = r#"
    account_id, role, name, username, email, password_hash, gender, age,
    speciality, license_id, years_of_experience, is_active, created_at
"#;

/// Account as returned over the API; never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct AccountProfile {
    pub id: Uuid,
    pub role: Role,
    pub name: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speciality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years_of_experience: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<AccountRow> for AccountProfile {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.account_id,
            role: row.role,
            name: row.name,
            username: row.username,
            email: row.email,
            gender: row.gender,
            age: row.age,
            speciality: row.speciality,
            doc_id: row.license_id,
            years_of_experience: row.years_of_experience,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub user_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_time: DateTime<Utc>,
    pub doctor_name: String,
    pub doctor_speciality: String,
    pub notes: String,
    pub status: AppointmentStatus,
    pub chat_room_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id, user_id, doctor_id, appointment_time, doctor_name,
    doctor_speciality, notes, status, chat_room_id, created_at, updated_at
"#;

impl AppointmentRow {
    pub fn involves(&self, account_id: Uuid) -> bool {
        self.user_id == account_id || self.doctor_id == account_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    #[test]
    fn pending_can_be_decided_once() {
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Rejected, Cancelled, Completed] {
            for to in [Pending, Accepted, Rejected, Cancelled, Completed] {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn accepted_moves_to_completed_or_cancelled() {
        assert!(Accepted.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Cancelled));
        assert!(!Accepted.can_transition_to(Rejected));
    }

    #[test]
    fn status_serializes_as_snake_case() {
        assert_eq!(serde_json::to_string(&Accepted).unwrap(), "\"accepted\"");
        assert_eq!(Completed.as_str(), "completed");
    }

    #[test]
    fn chat_room_id_is_derived_from_appointment() {
        let id = Uuid::nil();
        assert_eq!(chat_room_id_for(id), format!("chat-{id}"));
    }
}
