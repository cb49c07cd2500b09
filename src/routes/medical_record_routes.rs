use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    lab_report::{self, LabReport},
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, CreatedData, Role},
    routes::auth_routes::load_account,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medical-data", post(create_record))
        .route("/medical-data/{record_id}", get(get_record).patch(update_record))
        .route("/medical-data/user/{user_id}", get(list_records))
        .route("/lab-reports/{user_id}", post(upload_lab_report))
        .route("/lab-reports/user/{user_id}", get(list_lab_reports))
}

/* -------------------------
   Medical data
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub user_id: Uuid,
    pub medical_history: Option<String>,
    pub blood_pressure: Option<String>,
    pub sugar_level: Option<String>,
}

/// Absent fields are left as they are.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRecordRequest {
    pub medical_history: Option<String>,
    pub blood_pressure: Option<String>,
    pub sugar_level: Option<String>,
}

impl UpdateRecordRequest {
    fn is_empty(&self) -> bool {
        self.medical_history.is_none() && self.blood_pressure.is_none() && self.sugar_level.is_none()
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MedicalRecordRow {
    pub record_id: Uuid,
    pub user_id: Uuid,
    pub medical_history: Option<String>,
    pub blood_pressure: Option<String>,
    pub sugar_level: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RECORD_COLUMNS: &str =
    "record_id, user_id, medical_history, blood_pressure, sugar_level, created_at, updated_at";

#[derive(Debug, Serialize)]
pub struct RecordsListData {
    pub records: Vec<MedicalRecordRow>,
}

fn trimmed(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string())
}

async fn ensure_patient_exists(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    match load_account(state, user_id).await? {
        Some(a) if a.role == Role::Patient => Ok(()),
        _ => Err(ApiError::not_found("user")),
    }
}

async fn load_record(state: &AppState, record_id: Uuid) -> Result<MedicalRecordRow, ApiError> {
    sqlx::query_as::<_, MedicalRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM medical_record WHERE record_id = $1"
    ))
    .bind(record_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("medical record"))
}

pub async fn create_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateRecordRequest>,
) -> Result<Json<ApiOk<CreatedData>>, ApiError> {
    auth.require_patient_access(&state.db, req.user_id).await?;
    ensure_patient_exists(&state, req.user_id).await?;

    let record_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO medical_record (record_id, user_id, medical_history, blood_pressure, sugar_level)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(record_id)
    .bind(req.user_id)
    .bind(trimmed(req.medical_history))
    .bind(trimmed(req.blood_pressure))
    .bind(trimmed(req.sugar_level))
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(CreatedData { id: record_id })))
}

pub async fn update_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
    Json(req): Json<UpdateRecordRequest>,
) -> Result<Json<ApiOk<MedicalRecordRow>>, ApiError> {
    let existing = load_record(&state, record_id).await?;
    auth.require_patient_access(&state.db, existing.user_id).await?;

    if req.is_empty() {
        return Err(ApiError::validation("no fields to update"));
    }

    let updated: MedicalRecordRow = sqlx::query_as::<_, MedicalRecordRow>(&format!(
        r#"
        UPDATE medical_record
        SET medical_history = COALESCE($2, medical_history),
            blood_pressure = COALESCE($3, blood_pressure),
            sugar_level = COALESCE($4, sugar_level),
            updated_at = now()
        WHERE record_id = $1
        RETURNING {RECORD_COLUMNS}
        "#
    ))
    .bind(record_id)
    .bind(trimmed(req.medical_history))
    .bind(trimmed(req.blood_pressure))
    .bind(trimmed(req.sugar_level))
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("medical record"))?;

    Ok(Json(ApiOk::new(updated)))
}

pub async fn get_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<MedicalRecordRow>>, ApiError> {
    let record = load_record(&state, record_id).await?;
    auth.require_patient_access(&state.db, record.user_id).await?;
    Ok(Json(ApiOk::new(record)))
}

pub async fn list_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<RecordsListData>>, ApiError> {
    auth.require_patient_access(&state.db, user_id).await?;

    let records = sqlx::query_as::<_, MedicalRecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM medical_record WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(RecordsListData { records })))
}

/* -------------------------
   Lab reports
--------------------------*/

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct LabReportRow {
    pub report_id: Uuid,
    pub user_id: Uuid,
    pub patient_name: Option<String>,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub recorded_at: Option<String>,
    pub blood_pressure: Option<String>,
    pub sugar_level: Option<String>,
    pub thyroid: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LabReportData {
    pub id: Uuid,
    pub report: LabReport,
}

#[derive(Debug, Serialize)]
pub struct LabReportsListData {
    pub reports: Vec<LabReportRow>,
}

const MAX_REPORT_BYTES: usize = 256 * 1024;

/// Body is the already-extracted report text.
pub async fn upload_lab_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    body: String,
) -> Result<Json<ApiOk<LabReportData>>, ApiError> {
    auth.require_patient_access(&state.db, user_id).await?;
    ensure_patient_exists(&state, user_id).await?;

    if body.len() > MAX_REPORT_BYTES {
        return Err(ApiError::PayloadTooLarge(format!(
            "lab report text exceeds {MAX_REPORT_BYTES} bytes"
        )));
    }

    let report = lab_report::parse(&body);
    if report.is_empty() {
        return Err(ApiError::BadRequest(
            "UNRECOGNISED_REPORT",
            "no known lab report fields found".into(),
        ));
    }

    let report_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO lab_report
            (report_id, user_id, patient_name, gender, age, recorded_at, blood_pressure, sugar_level, thyroid)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(report_id)
    .bind(user_id)
    .bind(&report.patient_name)
    .bind(&report.gender)
    .bind(&report.age)
    .bind(&report.recorded_at)
    .bind(&report.blood_pressure)
    .bind(&report.sugar_level)
    .bind(&report.thyroid)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%report_id, %user_id, "lab report stored");
    Ok(Json(ApiOk::new(LabReportData { id: report_id, report })))
}

pub async fn list_lab_reports(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<LabReportsListData>>, ApiError> {
    auth.require_patient_access(&state.db, user_id).await?;

    let reports = sqlx::query_as::<_, LabReportRow>(
        r#"
        SELECT report_id, user_id, patient_name, gender, age, recorded_at,
               blood_pressure, sugar_level, thyroid, created_at
        FROM lab_report
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk::new(LabReportsListData { reports })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_is_detected() {
        assert!(UpdateRecordRequest::default().is_empty());
        let req: UpdateRecordRequest = serde_json::from_str(r#"{"sugar_level":"110"}"#).unwrap();
        assert!(!req.is_empty());
        assert!(req.medical_history.is_none());
    }

    #[test]
    fn values_are_trimmed() {
        assert_eq!(trimmed(Some(" 120/80 ".into())).as_deref(), Some("120/80"));
        assert_eq!(trimmed(None), None);
    }
}
