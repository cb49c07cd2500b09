mod auth;
mod completion;
mod config;
mod middleware;

mod db;
mod error;
mod lab_report;
mod models;
mod outbreak;
mod prediction;
mod routes;
mod storage;

use std::sync::Arc;

use crate::{
    completion::{CompletionClient, DisabledCompletion, HttpCompletionClient},
    config::Config,
    models::AppState,
    prediction::registry::ModelRegistry,
    storage::AttachmentStore,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;

    if let Some(admin) = &cfg.bootstrap_admin {
        db::ensure_bootstrap_admin(&pool, admin).await?;
    }

    let models = ModelRegistry::load_dir(&cfg.model_dir);
    if models.symptom_models().is_empty() {
        tracing::warn!(dir = %cfg.model_dir.display(), "no symptom models loaded; /predict/symptoms will answer 503");
    }

    let completion: Arc<dyn CompletionClient> = match cfg.completion.clone() {
        Some(c) => {
            tracing::info!(model = %c.model, "text completion enabled");
            Arc::new(HttpCompletionClient::new(c)?)
        }
        None => {
            tracing::info!("text completion disabled; chatbot uses built-in replies");
            Arc::new(DisabledCompletion)
        }
    };

    let attachments = AttachmentStore::open(&cfg.upload_dir, cfg.max_upload_bytes)?;

    let state = AppState {
        db: pool,
        session_ttl_hours: cfg.session_ttl_hours,
        models: Arc::new(models),
        completion,
        attachments,
        outbreak: cfg.outbreak,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
        .expose_headers([header::CONTENT_DISPOSITION]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
