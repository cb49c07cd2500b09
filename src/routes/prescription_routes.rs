use axum::{
    Json, Router,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, CreatedData, Role},
    routes::{appointment_routes::load_appointment, auth_routes::load_account},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prescriptions", post(create_prescription))
        .route("/prescriptions/{doctor_id}", get(list_by_doctor))
        .route("/prescriptions/patient/{user_id}", get(list_by_patient))
        .route("/download_prescription/{prescription_id}", get(download_prescription))
}

#[derive(Debug, Deserialize)]
pub struct CreatePrescriptionRequest {
    pub user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub prescription: String,
    pub disease_name: String,
    #[serde(default)]
    pub status: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PrescriptionRow {
    pub prescription_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub user_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub symptoms: Vec<String>,
    pub prescription_text: String,
    pub disease_name: String,
    pub status: bool,
    pub created_at: DateTime<Utc>,
}

const PRESCRIPTION_SELECT: &str = r#"
    SELECT p.prescription_id, p.appointment_id, p.user_id, u.name AS patient_name,
           p.doctor_id, d.name AS doctor_name, p.symptoms, p.prescription_text,
           p.disease_name, p.status, p.created_at
    FROM prescription p
    JOIN account u ON u.account_id = p.user_id
    JOIN account d ON d.account_id = p.doctor_id
"#;

#[derive(Debug, Serialize)]
pub struct PrescriptionsListData {
    pub prescriptions: Vec<PrescriptionRow>,
}

/// Plain-text prescription document.
pub fn render_prescription(p: &PrescriptionRow) -> String {
    let mut out = String::new();
    out.push_str("Prescription Details\n");
    out.push_str("====================\n\n");
    out.push_str(&format!("Patient Name: {}\n", p.patient_name));
    out.push_str(&format!("Doctor Name: {}\n", p.doctor_name));
    out.push_str(&format!("Disease: {}\n", p.disease_name));
    out.push_str(&format!("Symptoms: {}\n", p.symptoms.join(", ")));
    out.push_str(&format!("Prescription: {}\n", p.prescription_text));
    out.push_str(&format!(
        "\nIssued: {}\n",
        p.created_at.format("%Y-%m-%d %H:%M UTC")
    ));
    out
}

fn clean_symptoms(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn load_prescription(state: &AppState, prescription_id: Uuid) -> Result<PrescriptionRow, ApiError> {
    sqlx::query_as::<_, PrescriptionRow>(&format!(
        "{PRESCRIPTION_SELECT} WHERE p.prescription_id = $1"
    ))
    .bind(prescription_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("prescription"))
}

pub async fn create_prescription(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePrescriptionRequest>,
) -> Result<Json<ApiOk<CreatedData>>, ApiError> {
    auth.require(Role::Doctor)?;

    let text = req.prescription.trim();
    let disease = req.disease_name.trim();
    if text.is_empty() || disease.is_empty() {
        return Err(ApiError::validation("prescription and disease_name are required"));
    }

    match load_account(&state, req.user_id).await? {
        Some(a) if a.role == Role::Patient => {}
        _ => return Err(ApiError::not_found("user")),
    }

    if let Some(appointment_id) = req.appointment_id {
        let appt = load_appointment(&state, appointment_id).await?;
        if appt.doctor_id != auth.account_id || appt.user_id != req.user_id {
            return Err(ApiError::validation(
                "appointment does not belong to this doctor and patient",
            ));
        }
    }

    let prescription_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO prescription
            (prescription_id, appointment_id, user_id, doctor_id, symptoms, prescription_text, disease_name, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(prescription_id)
    .bind(req.appointment_id)
    .bind(req.user_id)
    .bind(auth.account_id)
    .bind(clean_symptoms(req.symptoms))
    .bind(text)
    .bind(disease)
    .bind(req.status)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%prescription_id, doctor_id = %auth.account_id, "prescription added");
    Ok(Json(ApiOk::new(CreatedData { id: prescription_id })))
}

pub async fn list_by_doctor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<PrescriptionsListData>>, ApiError> {
    auth.require_self_or_admin(doctor_id)?;

    let prescriptions = sqlx::query_as::<_, PrescriptionRow>(&format!(
        "{PRESCRIPTION_SELECT} WHERE p.doctor_id = $1 ORDER BY p.created_at DESC"
    ))
    .bind(doctor_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(PrescriptionsListData { prescriptions })))
}

pub async fn list_by_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<PrescriptionsListData>>, ApiError> {
    auth.require_patient_access(&state.db, user_id).await?;

    let prescriptions = sqlx::query_as::<_, PrescriptionRow>(&format!(
        "{PRESCRIPTION_SELECT} WHERE p.user_id = $1 ORDER BY p.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(PrescriptionsListData { prescriptions })))
}

pub async fn download_prescription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(prescription_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let p = load_prescription(&state, prescription_id).await?;
    if !(auth.is_admin() || auth.account_id == p.user_id || auth.account_id == p.doctor_id) {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "you have no access to this prescription".into(),
        ));
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"prescription_{prescription_id}.txt\""),
            ),
        ],
        render_prescription(&p),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PrescriptionRow {
        PrescriptionRow {
            prescription_id: Uuid::nil(),
            appointment_id: None,
            user_id: Uuid::new_v4(),
            patient_name: "Ada Obi".into(),
            doctor_id: Uuid::new_v4(),
            doctor_name: "Dr. Bello".into(),
            symptoms: vec!["fever".into(), "headache".into()],
            prescription_text: "Paracetamol 500mg twice daily".into(),
            disease_name: "Malaria".into(),
            status: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, 2, 14, 30, 0).unwrap(),
        }
    }

    #[test]
    fn renders_every_section() {
        let doc = render_prescription(&sample());
        assert!(doc.starts_with("Prescription Details\n"));
        assert!(doc.contains("Patient Name: Ada Obi\n"));
        assert!(doc.contains("Doctor Name: Dr. Bello\n"));
        assert!(doc.contains("Disease: Malaria\n"));
        assert!(doc.contains("Symptoms: fever, headache\n"));
        assert!(doc.contains("Prescription: Paracetamol 500mg twice daily\n"));
        assert!(doc.contains("Issued: 2024-05-02 14:30 UTC"));
    }

    #[test]
    fn empty_symptoms_render_blank() {
        let mut p = sample();
        p.symptoms.clear();
        assert!(render_prescription(&p).contains("Symptoms: \n"));
    }

    #[test]
    fn blank_symptoms_are_dropped() {
        let cleaned = clean_symptoms(vec![" cough ".into(), "  ".into(), "fever".into()]);
        assert_eq!(cleaned, vec!["cough", "fever"]);
    }
}
