//! HTTP route handlers for the chat demo API.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tracing::{error, warn};

use super::client_ip::ClientIp;
use super::sessions::SessionId;
use super::state::{AppState, UiConfig};
use crate::chat::{ButtonStates, ButtonUpdate, GenerationParams, TextInput, Turn, UiEvent, UiUpdate};
use crate::config::ModelListMode;
use crate::conversation::{Conversation, ImageAttachment, ImageProcessMode};
use crate::log_store::VoteType;

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Largest accepted request body. Uploads arrive base64-encoded inside JSON, so
/// this admits document scans of roughly 15 MB.
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>, static_dir: &FsPath) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/ui", get(ui_config))
        .route("/api/session", post(create_session))
        .route("/api/session/{id}/{event}", post(session_event))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "docowl-web",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.model.model_name(),
        "sessions": state.sessions.len(),
        "idle_generation_slots": state.generation_permits.available_permits(),
    }))
}

async fn ui_config(State(state): State<Arc<AppState>>) -> Json<UiConfig> {
    Json(state.ui.clone())
}

/// Page load parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoadRequest {
    /// Query parameters of the page URL.
    pub url_params: serde_json::Value,
}

/// Body of `add_text`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddTextRequest {
    /// Textbox content.
    pub text: String,
    /// Base64 image, optionally as a data URI.
    pub image: Option<String>,
    /// Preprocessing radio value.
    pub image_process_mode: ImageProcessMode,
}

/// Body of `regenerate`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegenerateRequest {
    /// Preprocessing radio value.
    pub image_process_mode: ImageProcessMode,
}

/// Answer to every non-streaming event.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    /// Session the update belongs to.
    pub session_id: SessionId,
    /// Render instructions.
    pub ui: UiUpdate,
}

/// Parse a JSON body; an empty body means all defaults.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))
}

/// Decode a base64 upload, optionally wrapped in a `data:` URI. Anything that is
/// not a readable image is a bad request.
async fn decode_image(data: &str) -> ApiResult<ImageAttachment> {
    let payload = data.split_once(";base64,").map_or(data, |(_, rest)| rest);
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image encoding: {e}")))?;

    tokio::task::spawn_blocking(move || ImageAttachment::decode(&bytes))
        .await
        .map_err(|e| {
            error!(error = %e, "Image decoding task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Image decoding failed".to_string())
        })?
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image: {e}")))
}

fn session_not_found(id: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Unknown session: {id}"))
}

/// Store the new state and answer with its render.
fn commit(state: &AppState, id: SessionId, turn: Turn) -> ApiResult<Json<EventResponse>> {
    if !state.sessions.put(id, turn.state) {
        return Err(session_not_found(&id.to_string()));
    }
    Ok(Json(EventResponse {
        session_id: id,
        ui: turn.ui,
    }))
}

/// Page load: open a session with a fresh conversation.
async fn create_session(
    State(state): State<Arc<AppState>>,
    ClientIp(client): ClientIp,
    body: Bytes,
) -> ApiResult<Json<EventResponse>> {
    let request: LoadRequest = parse_body(&body)?;

    if state.model_list_mode == ModelListMode::Reload {
        state.probe_worker().await;
    }

    let conversation = state.orchestrator.load_demo(&request.url_params, &client);
    let ui = UiUpdate::render(&conversation, ButtonStates::all(ButtonUpdate::Disable));
    let session_id = state.sessions.create(conversation);
    Ok(Json(EventResponse { session_id, ui }))
}

/// Dispatch a UI event against an existing session.
async fn session_event(
    State(state): State<Arc<AppState>>,
    Path((id, event)): Path<(String, String)>,
    ClientIp(client): ClientIp,
    body: Bytes,
) -> ApiResult<Response> {
    let event: UiEvent = event
        .parse()
        .map_err(|name| (StatusCode::NOT_FOUND, format!("Unknown event: {name}")))?;
    let session_id: SessionId = id.parse().map_err(|_| session_not_found(&id))?;
    let conversation = state
        .sessions
        .get(session_id)
        .ok_or_else(|| session_not_found(&id))?;

    let response = match event {
        UiEvent::Load => {
            let request: LoadRequest = parse_body(&body)?;
            let fresh = state.orchestrator.load_demo(&request.url_params, &client);
            let turn = Turn::render(fresh, ButtonStates::all(ButtonUpdate::Disable));
            commit(&state, session_id, turn)?.into_response()
        }
        UiEvent::AddText => {
            let request: AddTextRequest = parse_body(&body)?;
            let image = match request.image.as_deref() {
                Some(data) => Some(decode_image(data).await?),
                None => None,
            };
            let input = TextInput {
                text: request.text,
                image,
                image_process_mode: request.image_process_mode,
            };
            let turn = state.orchestrator.add_text(conversation, input, &client).await;
            commit(&state, session_id, turn)?.into_response()
        }
        UiEvent::Regenerate => {
            let request: RegenerateRequest = parse_body(&body)?;
            let turn = state
                .orchestrator
                .regenerate(conversation, request.image_process_mode, &client);
            commit(&state, session_id, turn)?.into_response()
        }
        UiEvent::Clear => {
            let turn = state.orchestrator.clear_history(&client);
            commit(&state, session_id, turn)?.into_response()
        }
        UiEvent::Upvote | UiEvent::Downvote | UiEvent::Flag => {
            let vote_type = match event {
                UiEvent::Upvote => VoteType::Upvote,
                UiEvent::Downvote => VoteType::Downvote,
                _ => VoteType::Flag,
            };
            let ui = state
                .orchestrator
                .vote(&conversation, vote_type, &client)
                .await
                .map_err(|e| {
                    error!(error = %e, session = %session_id, "Failed to record vote");
                    (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to record vote: {e}"))
                })?;
            Json(EventResponse { session_id, ui }).into_response()
        }
        UiEvent::Generate => {
            let params: GenerationParams = parse_body(&body)?;
            generate(Arc::clone(&state), session_id, conversation, params, client).into_response()
        }
    };

    Ok(response)
}

/// Stream one `update` event per render, then `done`.
///
/// Waits for a generation slot before contacting the worker. Each render's state is
/// written back to the session, so a dropped connection leaves the last seen state.
fn generate(
    state: Arc<AppState>,
    session_id: SessionId,
    conversation: Conversation,
    params: GenerationParams,
    client: String,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = async_stream::stream! {
        let Ok(_permit) = Arc::clone(&state.generation_permits).acquire_owned().await else {
            warn!(session = %session_id, "Generation slots closed");
            return;
        };

        let mut turns = state.orchestrator.http_bot(conversation, params, client);
        while let Some(turn) = turns.next().await {
            if !state.sessions.put(session_id, turn.state) {
                warn!(session = %session_id, "Session expired during generation");
            }
            yield Event::default().event("update").json_data(&turn.ui);
        }

        yield Ok(Event::default().event("done").data("{}"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
