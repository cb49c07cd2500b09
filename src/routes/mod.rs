use crate::models::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;

pub mod appointment_routes;
pub mod auth_routes;
pub mod chat_routes;
pub mod chatbot_routes;
pub mod doctor_routes;
pub mod home_routes;
pub mod medical_record_routes;
pub mod notification_routes;
pub mod outbreak_routes;
pub mod prediction_routes;
pub mod prescription_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    // multipart framing on top of the largest attachment
    let body_limit = state.attachments.max_bytes() + 64 * 1024;

    let api = Router::new()
        .merge(doctor_routes::router())
        .merge(appointment_routes::router())
        .merge(chat_routes::router())
        .merge(prescription_routes::router())
        .merge(medical_record_routes::router())
        .merge(notification_routes::router())
        .merge(chatbot_routes::router())
        .merge(prediction_routes::router());

    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1/outbreaks", outbreak_routes::router())
        .nest("/api/v1", api)
        .merge(home_routes::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
