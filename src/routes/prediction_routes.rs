use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    completion::CompletionClient,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
    outbreak::{detector, geo::GeoPoint},
    prediction::{ensemble::Vote, registry::ClinicalModel},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/predict_cancer", post(predict_clinical::<CancerInput>))
        .route("/predict_diabetes", post(predict_clinical::<DiabetesInput>))
        .route("/predict_heart", post(predict_clinical::<HeartInput>))
        .route("/predict_liver", post(predict_clinical::<LiverInput>))
        .route("/predict/symptoms", post(predict_symptoms))
}

/* ============================================================
   Clinical screening inputs
   ============================================================ */

/// A typed request body mapped onto the feature order its model was trained with.
pub trait ClinicalInput {
    const MODEL: ClinicalModel;
    fn features(&self) -> Vec<f64>;
}

#[derive(Debug, Deserialize)]
pub struct CancerInput {
    pub radius_mean: f64,
    pub area_mean: f64,
    pub perimeter_mean: f64,
    pub concavity_mean: f64,
    pub concave_points_mean: f64,
}

impl ClinicalInput for CancerInput {
    const MODEL: ClinicalModel = ClinicalModel::Cancer;
    fn features(&self) -> Vec<f64> {
        vec![
            self.radius_mean,
            self.area_mean,
            self.perimeter_mean,
            self.concavity_mean,
            self.concave_points_mean,
        ]
    }
}

#[derive(Debug, Deserialize)]
pub struct DiabetesInput {
    pub pregnancies: u32,
    pub glucose: f64,
    pub blood_pressure: f64,
    pub bmi: f64,
    pub diabetes_pedigree_function: f64,
    pub age: u32,
}

impl ClinicalInput for DiabetesInput {
    const MODEL: ClinicalModel = ClinicalModel::Diabetes;
    fn features(&self) -> Vec<f64> {
        vec![
            f64::from(self.pregnancies),
            self.glucose,
            self.blood_pressure,
            self.bmi,
            self.diabetes_pedigree_function,
            f64::from(self.age),
        ]
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartInput {
    pub cp: i32,
    pub trestbps: i32,
    pub chol: i32,
    pub fbs: i32,
    pub restecg: i32,
    pub thalach: i32,
    pub exang: i32,
}

impl ClinicalInput for HeartInput {
    const MODEL: ClinicalModel = ClinicalModel::Heart;
    fn features(&self) -> Vec<f64> {
        [
            self.cp,
            self.trestbps,
            self.chol,
            self.fbs,
            self.restecg,
            self.thalach,
            self.exang,
        ]
        .into_iter()
        .map(f64::from)
        .collect()
    }
}

/// Field names follow the training dataset's column names as aliases.
#[derive(Debug, Deserialize)]
pub struct LiverInput {
    #[serde(alias = "Total_Bilirubin")]
    pub total_bilirubin: f64,
    #[serde(alias = "Direct_Bilirubin")]
    pub direct_bilirubin: f64,
    #[serde(alias = "Alkaline_Phosphotase")]
    pub alkaline_phosphotase: i32,
    #[serde(alias = "Alamine_Aminotransferase")]
    pub alamine_aminotransferase: i32,
    #[serde(alias = "Total_Protiens")]
    pub total_protiens: f64,
    #[serde(alias = "Albumin")]
    pub albumin: f64,
    #[serde(alias = "Albumin_and_Globulin_Ratio")]
    pub albumin_and_globulin_ratio: f64,
}

impl ClinicalInput for LiverInput {
    const MODEL: ClinicalModel = ClinicalModel::Liver;
    fn features(&self) -> Vec<f64> {
        vec![
            self.total_bilirubin,
            self.direct_bilirubin,
            f64::from(self.alkaline_phosphotase),
            f64::from(self.alamine_aminotransferase),
            self.total_protiens,
            self.albumin,
            self.albumin_and_globulin_ratio,
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct ClinicalPrediction {
    pub model: &'static str,
    pub prediction: i64,
}

/// Labels may be exported as `"1"` or `"1.0"`; anything else is a broken model.
fn class_to_int(model: ClinicalModel, label: &str) -> Result<i64, ApiError> {
    let label = label.trim();
    if let Ok(n) = label.parse::<i64>() {
        return Ok(n);
    }
    match label.parse::<f64>() {
        Ok(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => Ok(x as i64),
        _ => Err(ApiError::Unavailable(
            "MODEL_UNAVAILABLE",
            format!("model {} has a non-integer class label {label:?}", model.name()),
        )),
    }
}

pub async fn predict_clinical<T>(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(input): Json<T>,
) -> Result<Json<ApiOk<ClinicalPrediction>>, ApiError>
where
    T: ClinicalInput + DeserializeOwned + Send + 'static,
{
    let kind = T::MODEL;
    let model = state.models.clinical(kind).ok_or_else(|| {
        ApiError::Unavailable(
            "MODEL_UNAVAILABLE",
            format!("{} model is not loaded", kind.name()),
        )
    })?;

    let label = model.predict(&input.features())?;
    let prediction = class_to_int(kind, label)?;

    tracing::debug!(model = kind.name(), prediction, "clinical prediction");
    Ok(Json(ApiOk::new(ClinicalPrediction {
        model: kind.name(),
        prediction,
    })))
}

/* ============================================================
   Symptom ensemble
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SymptomRequest {
    pub symptoms: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SymptomPrediction {
    pub disease: String,
    pub votes: Vec<Vote>,
    pub agreement: f64,
    /// Set when the prediction was stored for outbreak detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
}

const ADVICE_PROMPT: &str = "You are the assistant of a telehealth service. Given reported \
symptoms and a screening model's most likely condition, give two or three sentences of general, \
non-diagnostic advice and recommend seeing a doctor when appropriate.";

pub(crate) fn location(latitude: Option<f64>, longitude: Option<f64>) -> Result<Option<GeoPoint>, ApiError> {
    match (latitude, longitude) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) => Ok(Some(GeoPoint::new(lat, lon)?)),
        _ => Err(ApiError::validation(
            "latitude and longitude must be given together",
        )),
    }
}

async fn advice_for(client: &dyn CompletionClient, symptoms: &[String], disease: &str) -> Option<String> {
    if !client.is_enabled() {
        return None;
    }
    let prompt = format!(
        "Symptoms: {}\nMost likely condition: {}",
        symptoms.join(", "),
        disease
    );
    match client.complete(ADVICE_PROMPT, &prompt).await {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "advice completion failed");
            None
        }
    }
}

pub async fn predict_symptoms(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<SymptomRequest>,
) -> Result<Json<ApiOk<SymptomPrediction>>, ApiError> {
    let point = location(req.latitude, req.longitude)?;
    let outcome = state.models.predict_symptoms(&req.symptoms)?;

    let mut prediction_id = None;
    if let Some(point) = point {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO prediction_event (prediction_id, user_id, disease, latitude, longitude)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(auth.account_id)
        .bind(&outcome.disease)
        .bind(point.latitude)
        .bind(point.longitude)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
        prediction_id = Some(id);

        // the prediction itself already succeeded
        if let Err(e) = detector::scan_disease(&state.db, &state.outbreak, &outcome.disease).await {
            tracing::error!(disease = %outcome.disease, error = ?e, "outbreak scan failed");
        }
    }

    let advice = advice_for(state.completion.as_ref(), &req.symptoms, &outcome.disease).await;

    Ok(Json(ApiOk::new(SymptomPrediction {
        disease: outcome.disease,
        votes: outcome.votes,
        agreement: outcome.agreement,
        prediction_id,
        advice,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionError, DisabledCompletion};
    use async_trait::async_trait;

    #[test]
    fn feature_vectors_match_model_widths() {
        let cancer = CancerInput {
            radius_mean: 17.99,
            area_mean: 1001.0,
            perimeter_mean: 122.8,
            concavity_mean: 0.3001,
            concave_points_mean: 0.1471,
        };
        assert_eq!(cancer.features().len(), ClinicalModel::Cancer.feature_count());
        assert_eq!(cancer.features()[1], 1001.0);

        let heart: HeartInput = serde_json::from_str(
            r#"{"cp":3,"trestbps":145,"chol":233,"fbs":1,"restecg":0,"thalach":150,"exang":0}"#,
        )
        .unwrap();
        assert_eq!(heart.features(), vec![3.0, 145.0, 233.0, 1.0, 0.0, 150.0, 0.0]);
        assert_eq!(heart.features().len(), ClinicalModel::Heart.feature_count());
    }

    #[test]
    fn liver_accepts_dataset_column_names() {
        let liver: LiverInput = serde_json::from_str(
            r#"{
                "Total_Bilirubin": 0.7, "Direct_Bilirubin": 0.1,
                "Alkaline_Phosphotase": 187, "Alamine_Aminotransferase": 16,
                "Total_Protiens": 6.8, "Albumin": 3.3, "Albumin_and_Globulin_Ratio": 0.9
            }"#,
        )
        .unwrap();
        assert_eq!(liver.features().len(), ClinicalModel::Liver.feature_count());
        assert_eq!(liver.features()[2], 187.0);
    }

    #[test]
    fn diabetes_orders_features_like_training() {
        let d = DiabetesInput {
            pregnancies: 2,
            glucose: 138.0,
            blood_pressure: 62.0,
            bmi: 33.6,
            diabetes_pedigree_function: 0.127,
            age: 47,
        };
        assert_eq!(d.features(), vec![2.0, 138.0, 62.0, 33.6, 0.127, 47.0]);
    }

    #[test]
    fn class_labels_must_be_integers() {
        assert_eq!(class_to_int(ClinicalModel::Heart, "1").unwrap(), 1);
        assert_eq!(class_to_int(ClinicalModel::Heart, " 0 ").unwrap(), 0);
        assert_eq!(class_to_int(ClinicalModel::Heart, "1.0").unwrap(), 1);
        assert_eq!(class_to_int(ClinicalModel::Heart, "0.0").unwrap(), 0);
        assert!(class_to_int(ClinicalModel::Heart, "0.5").is_err());
        assert!(class_to_int(ClinicalModel::Heart, "NaN").is_err());
        assert!(class_to_int(ClinicalModel::Heart, "yes").is_err());
    }

    #[test]
    fn location_needs_both_coordinates() {
        assert!(location(None, None).unwrap().is_none());
        assert!(location(Some(6.5), None).is_err());
        assert!(location(Some(91.0), Some(3.4)).is_err());
        let p = location(Some(6.52), Some(3.37)).unwrap().unwrap();
        assert_eq!((p.latitude, p.longitude), (6.52, 3.37));
    }

    struct Echo;

    #[async_trait]
    impl CompletionClient for Echo {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, CompletionError> {
            Ok(user.to_string())
        }
    }

    #[tokio::test]
    async fn advice_is_best_effort() {
        let symptoms = vec!["fever".to_string(), "chills".to_string()];
        assert_eq!(advice_for(&DisabledCompletion, &symptoms, "malaria").await, None);
        let advice = advice_for(&Echo, &symptoms, "malaria").await.unwrap();
        assert!(advice.contains("fever, chills"));
        assert!(advice.contains("malaria"));
    }
}
