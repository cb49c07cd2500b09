use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        APPOINTMENT_COLUMNS, AppState, AppointmentRow, AppointmentStatus, ApiOk, OkData, Role,
        chat_room_id_for,
    },
    routes::{
        auth_routes::load_account,
        chat_routes::{purge_rooms, remove_files},
        doctor_routes::find_doctor,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(book_appointment))
        .route("/book_appointment", post(book_appointment))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/accept", put(accept_appointment))
        .route("/appointments/{appointment_id}/reject", put(reject_appointment))
        .route("/appointments/{appointment_id}/cancel", put(cancel_appointment))
        .route("/appointments/{appointment_id}/complete", put(complete_appointment))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentsListData {
    pub appointments: Vec<AppointmentRow>,
}

#[derive(Debug, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub appointment_time: DateTime<Utc>,
    /// Only admins book on behalf of a patient.
    pub user_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

const MAX_NOTES_LEN: usize = 2000;

/* ============================================================
   Rules
   ============================================================ */

fn slot_taken() -> ApiError {
    ApiError::Conflict(
        "SLOT_TAKEN",
        "the doctor already has an appointment at this time".into(),
    )
}

fn map_slot_conflict(e: sqlx::Error) -> ApiError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => slot_taken(),
        _ => ApiError::db(e),
    }
}

fn ensure_future(time: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ApiError> {
    if time <= now {
        return Err(ApiError::validation("appointment_time must be in the future"));
    }
    Ok(())
}

fn clean_notes(notes: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(n) = notes else { return Ok(None) };
    let n = n.trim().to_string();
    if n.chars().count() > MAX_NOTES_LEN {
        return Err(ApiError::validation(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(Some(n))
}

pub(crate) fn check_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), ApiError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(ApiError::Conflict(
            "INVALID_TRANSITION",
            format!(
                "appointment is {} and cannot become {}",
                current.as_str(),
                next.as_str()
            ),
        ))
    }
}

/// Who may drive each transition: the doctor decides and completes,
/// either participant (or an admin) cancels.
pub(crate) fn check_actor(
    auth: &AuthContext,
    appt: &AppointmentRow,
    next: AppointmentStatus,
) -> Result<(), ApiError> {
    let allowed = match next {
        AppointmentStatus::Accepted | AppointmentStatus::Rejected | AppointmentStatus::Completed => {
            auth.is_doctor() && appt.doctor_id == auth.account_id
        }
        AppointmentStatus::Cancelled => auth.is_admin() || appt.involves(auth.account_id),
        AppointmentStatus::Pending => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            format!("you may not mark this appointment {}", next.as_str()),
        ))
    }
}

fn ensure_can_view(auth: &AuthContext, appt: &AppointmentRow) -> Result<(), ApiError> {
    if auth.is_admin() || appt.involves(auth.account_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you are not part of this appointment".into(),
        ))
    }
}

pub(crate) async fn load_appointment(
    state: &AppState,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1"
    ))
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("appointment"))
}

async fn slot_is_free(
    state: &AppState,
    doctor_id: Uuid,
    time: DateTime<Utc>,
    ignore: Option<Uuid>,
) -> Result<bool, ApiError> {
    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM appointment
            WHERE doctor_id = $1
              AND appointment_time = $2
              AND status IN ($3, $4)
              AND ($5::uuid IS NULL OR appointment_id <> $5)
        )
        "#,
    )
    .bind(doctor_id)
    .bind(time)
    .bind(AppointmentStatus::Pending)
    .bind(AppointmentStatus::Accepted)
    .bind(ignore)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(!taken)
}

/* ============================================================
   GET /appointments
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<AppointmentsListData>>, ApiError> {
    let (patient, doctor) = match auth.role {
        Role::Admin => (None, None),
        Role::Patient => (Some(auth.account_id), None),
        Role::Doctor => (None, Some(auth.account_id)),
    };

    let appointments: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::uuid IS NULL OR doctor_id = $2)
          AND ($3::smallint IS NULL OR status = $3)
        ORDER BY appointment_time DESC
        LIMIT 500
        "#
    ))
    .bind(patient)
    .bind(doctor)
    .bind(q.status)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(AppointmentsListData { appointments })))
}

/* ============================================================
   POST /appointments, POST /book_appointment
   ============================================================ */

pub async fn book_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let user_id = match auth.role {
        Role::Patient => match req.user_id {
            Some(id) if id != auth.account_id => {
                return Err(ApiError::Forbidden(
                    "FORBIDDEN",
                    "patients can only book for themselves".into(),
                ));
            }
            _ => auth.account_id,
        },
        Role::Admin => req
            .user_id
            .ok_or_else(|| ApiError::validation("user_id is required"))?,
        Role::Doctor => {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "doctors cannot book appointments".into(),
            ));
        }
    };

    ensure_future(req.appointment_time, Utc::now())?;
    let notes = clean_notes(req.notes)?.unwrap_or_default();

    let patient_ok = matches!(
        load_account(&state, user_id).await?,
        Some(a) if a.role == Role::Patient && a.is_active
    );
    let doctor = find_doctor(&state, req.doctor_id)
        .await?
        .filter(|d| d.is_active);
    let Some(doctor) = doctor.filter(|_| patient_ok) else {
        return Err(ApiError::BadRequest(
            "INVALID_PARTICIPANTS",
            "user or doctor does not exist".into(),
        ));
    };

    if !slot_is_free(&state, doctor.account_id, req.appointment_time, None).await? {
        return Err(slot_taken());
    }

    let appointment: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        INSERT INTO appointment
            (appointment_id, user_id, doctor_id, appointment_time, doctor_name, doctor_speciality, notes, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(doctor.account_id)
    .bind(req.appointment_time)
    .bind(&doctor.name)
    .bind(doctor.speciality.clone().unwrap_or_default())
    .bind(notes)
    .bind(AppointmentStatus::Pending)
    .fetch_one(&state.db)
    .await
    // the partial unique index catches a concurrent booking of the same slot
    .map_err(map_slot_conflict)?;

    tracing::info!(
        appointment_id = %appointment.appointment_id,
        doctor_id = %appointment.doctor_id,
        "appointment booked"
    );
    Ok(Json(ApiOk::new(appointment)))
}

/* ============================================================
   GET / PUT / DELETE /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = load_appointment(&state, appointment_id).await?;
    ensure_can_view(&auth, &appt)?;
    Ok(Json(ApiOk::new(appt)))
}

/// Reschedule or edit notes; only while still pending.
pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = load_appointment(&state, appointment_id).await?;
    if !(auth.is_admin() || appt.user_id == auth.account_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "only the patient can change this appointment".into(),
        ));
    }
    if appt.status != AppointmentStatus::Pending {
        return Err(ApiError::Conflict(
            "INVALID_TRANSITION",
            format!("appointment is {} and can no longer be changed", appt.status.as_str()),
        ));
    }

    let notes = clean_notes(req.notes)?;
    if let Some(time) = req.appointment_time {
        ensure_future(time, Utc::now())?;
        if !slot_is_free(&state, appt.doctor_id, time, Some(appt.appointment_id)).await? {
            return Err(slot_taken());
        }
    }

    let updated: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET appointment_time = COALESCE($2, appointment_time),
            notes = COALESCE($3, notes),
            updated_at = now()
        WHERE appointment_id = $1
          AND status = $4
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(req.appointment_time)
    .bind(notes)
    .bind(AppointmentStatus::Pending)
    .fetch_optional(&state.db)
    .await
    .map_err(map_slot_conflict)?
    .ok_or_else(|| {
        ApiError::Conflict(
            "INVALID_TRANSITION",
            "appointment changed while updating".into(),
        )
    })?;

    Ok(Json(ApiOk::new(updated)))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let appt = load_appointment(&state, appointment_id).await?;
    if !(auth.is_admin() || appt.user_id == auth.account_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "only the patient or an admin can delete this appointment".into(),
        ));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let rooms: Vec<String> = appt.chat_room_id.into_iter().collect();
    let stale_files = purge_rooms(&mut *tx, &rooms).await?;

    sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
        .bind(appointment_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    remove_files(&state.attachments, &stale_files).await;

    tracing::info!(%appointment_id, by = %auth.account_id, "appointment deleted");
    Ok(Json(OkData::message("Appointment deleted successfully")))
}

/* ============================================================
   Status transitions
   ============================================================ */

async fn transition(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    next: AppointmentStatus,
) -> Result<AppointmentRow, ApiError> {
    let appt = load_appointment(state, appointment_id).await?;
    ensure_can_view(auth, &appt)?;
    check_actor(auth, &appt, next)?;
    check_transition(appt.status, next)?;

    let room_id = (next == AppointmentStatus::Accepted).then(|| chat_room_id_for(appointment_id));

    // guarded on the status we checked, so a concurrent decision loses cleanly
    let updated: AppointmentRow = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET status = $2,
            chat_room_id = COALESCE($3, chat_room_id),
            updated_at = now()
        WHERE appointment_id = $1
          AND status = $4
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(next)
    .bind(room_id)
    .bind(appt.status)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| {
        ApiError::Conflict(
            "INVALID_TRANSITION",
            "appointment has already been processed".into(),
        )
    })?;

    tracing::info!(
        %appointment_id,
        from = appt.status.as_str(),
        to = next.as_str(),
        by = %auth.account_id,
        "appointment status changed"
    );
    Ok(updated)
}

pub async fn accept_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = transition(&state, &auth, appointment_id, AppointmentStatus::Accepted).await?;
    Ok(Json(ApiOk::new(appt)))
}

pub async fn reject_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = transition(&state, &auth, appointment_id, AppointmentStatus::Rejected).await?;
    Ok(Json(ApiOk::new(appt)))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = transition(&state, &auth, appointment_id, AppointmentStatus::Cancelled).await?;
    Ok(Json(ApiOk::new(appt)))
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let appt = transition(&state, &auth, appointment_id, AppointmentStatus::Completed).await?;
    Ok(Json(ApiOk::new(appt)))
}
