use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, Role};

#[derive(Serialize)]
pub struct HealthData {
    pub service: &'static str,
    pub status: &'static str,
    pub completion_enabled: bool,
    pub symptom_models: usize,
}

#[derive(Serialize)]
pub struct HomeData {
    pub view: &'static str,
    pub sections: Vec<&'static str>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/api/v1/home", get(home))
}

pub async fn health(State(state): State<AppState>) -> Json<ApiOk<HealthData>> {
    Json(ApiOk::new(HealthData {
        service: "telehealth-server",
        status: "ok",
        completion_enabled: state.completion.is_enabled(),
        symptom_models: state.models.symptom_models().len(),
    }))
}

/// Which dashboard sections the client should render for the caller.
pub async fn home(auth: AuthContext) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    let sections = match auth.role {
        Role::Patient => vec!["appointments", "chat", "prescriptions", "medical_data", "predictions", "notifications"],
        Role::Doctor => vec!["appointments", "chat", "prescriptions", "patients"],
        Role::Admin => vec!["users", "doctors", "appointments", "outbreaks"],
    };

    Ok(Json(ApiOk::new(HomeData {
        view: auth.role.as_str(),
        sections,
    })))
}
