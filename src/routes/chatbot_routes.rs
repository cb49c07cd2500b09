use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use crate::{
    completion::CompletionClient,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/chatbot/message", post(chatbot_message))
}

#[derive(Debug, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct BotReply {
    pub text: String,
    /// `completion` or `rules`
    pub source: &'static str,
}

const MAX_INPUT_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You are the assistant of a telehealth service. Answer briefly and \
in plain language. You do not diagnose; suggest booking an appointment with a doctor for anything \
that needs a medical opinion.";

pub const GREETING: &str = "Hello! How can I help you today?";
pub const FALLBACK: &str = "I'm not sure how to respond to that. Please try something else.";

pub fn rule_based_reply(input: &str) -> &'static str {
    if input.trim().eq_ignore_ascii_case("hello") {
        GREETING
    } else {
        FALLBACK
    }
}

/// Completion service first; rules when it is off or failing.
pub async fn reply(client: &dyn CompletionClient, input: &str) -> BotReply {
    if client.is_enabled() {
        match client.complete(SYSTEM_PROMPT, input).await {
            Ok(text) => {
                return BotReply {
                    text,
                    source: "completion",
                };
            }
            Err(e) => tracing::warn!(error = %e, "chatbot completion failed; using rules"),
        }
    }
    BotReply {
        text: rule_based_reply(input).to_string(),
        source: "rules",
    }
}

pub async fn chatbot_message(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(msg): Json<UserMessage>,
) -> Result<Json<ApiOk<BotReply>>, ApiError> {
    let text = msg.text.trim();
    if text.is_empty() {
        return Err(ApiError::validation("text is required"));
    }
    if text.chars().count() > MAX_INPUT_CHARS {
        return Err(ApiError::validation(format!(
            "text must be at most {MAX_INPUT_CHARS} characters"
        )));
    }

    Ok(Json(ApiOk::new(reply(state.completion.as_ref(), text).await)))
}
