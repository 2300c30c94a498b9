//! Webhook endpoint: Telegram update in, Gemini completion, reply out.
//!
//! Telegram retries deliveries that do not get a 2xx, so the handler answers
//! 200 for anything it can ignore and for every handled message, whatever
//! happens downstream. Only a present but malformed `message` gets a 400.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::llm::{CompletionService, GeminiClient};
use crate::platform::telegram::{TelegramNotifier, Update};
use crate::platform::Notifier;

pub const START_COMMAND: &str = "/start";
pub const HEALTH_PATH: &str = "/health";

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub completion: Arc<dyn CompletionService>,
    pub notifier: Arc<dyn Notifier>,
    pub system_instruction: Arc<str>,
    pub welcome_text: Arc<str>,
    pub error_text: Arc<str>,
}

impl AppState {
    /// Wire the real Gemini and Telegram clients from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            completion: Arc::new(GeminiClient::new(config.gemini.clone())),
            notifier: Arc::new(TelegramNotifier::new(config.telegram.clone())),
            system_instruction: Arc::from(config.gemini.system_instruction.as_str()),
            welcome_text: Arc::from(config.telegram.welcome_text.as_str()),
            error_text: Arc::from(config.telegram.error_text.as_str()),
        }
    }
}

pub fn router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route(
            webhook_path,
            post(handle_update).fallback(method_not_allowed),
        )
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "message": "Method not allowed" })),
    )
}

async fn handle_update(State(state): State<AppState>, body: Bytes) -> StatusCode {
    // Empty, non-JSON and non-object bodies carry no message.
    let update: Update = match serde_json::from_slice::<Value>(&body) {
        Ok(value @ Value::Object(_)) => match serde_json::from_value(value) {
            Ok(update) => update,
            Err(e) => {
                warn!("Rejecting malformed update: {}", e);
                return StatusCode::BAD_REQUEST;
            }
        },
        _ => {
            debug!("Body of {} bytes is not a JSON object, ignoring", body.len());
            return StatusCode::OK;
        }
    };

    let Some(message) = update.message else {
        debug!("Update {:?} carries no message, ignoring", update.update_id);
        return StatusCode::OK;
    };

    let sender = message.from.as_ref().and_then(|u| u.first_name.clone());
    let message_id = message.message_id;
    let Some(incoming) = message.into_incoming() else {
        debug!("Message {:?} has no text, ignoring", message_id);
        return StatusCode::OK;
    };

    info!(
        "Message from {} ({:?}) in chat {}: {} chars",
        sender.as_deref().unwrap_or("unknown"),
        incoming.user_id,
        incoming.chat_id,
        incoming.char_count()
    );

    if incoming.text == START_COMMAND {
        notify(&state, incoming.chat_id, &state.welcome_text).await;
        return StatusCode::OK;
    }

    let reply = match state
        .completion
        .complete(&state.system_instruction, &incoming.text)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            error!("Error processing message: {}", e);
            state.error_text.to_string()
        }
    };

    notify(&state, incoming.chat_id, &reply).await;
    StatusCode::OK
}

async fn notify(state: &AppState, chat_id: i64, text: &str) {
    if let Err(e) = state.notifier.send_message(chat_id, text, None).await {
        error!("Failed to deliver reply to chat {}: {}", chat_id, e);
    }
}
