//! Streaming generation: the `http_bot` half of a turn.

use chrono::{DateTime, Local};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{error, info, warn};

use super::orchestrator::{GenerationParams, Orchestrator};
use super::ui::{ButtonStates, ButtonUpdate, Turn};
use crate::conversation::template::FIRST_ROUND_TEMPLATE;
use crate::conversation::{
    AttachmentError, Conversation, ImageAttachment, ImageProcessMode, MessageContent,
    default_conversation, template,
};
use crate::llm::GenerateRequest;
use crate::log_store::{ChatRecord, ChatTag, epoch_seconds};

/// Appended to in-progress assistant text.
pub const TYPING_MARKER: char = '▌';

/// Shown when the worker cannot be reached or the stream breaks.
pub const SERVER_ERROR_MSG: &str =
    "**NETWORK ERROR DUE TO HIGH TRAFFIC. PLEASE REGENERATE OR REFRESH THIS PAGE.**";

/// Lazy sequence of UI updates for one generation.
pub type BotStream = BoxStream<'static, Turn>;

impl Orchestrator {
    /// Generate the pending assistant reply, yielding a render after every worker update.
    ///
    /// The stream ends after the first terminal update (completion, worker error or
    /// transport failure). A completed turn is logged exactly once, before its final
    /// render is yielded. Dropping the stream cancels the generation.
    #[must_use]
    pub fn http_bot(&self, state: Conversation, params: GenerationParams, client: String) -> BotStream {
        let this = self.clone();

        let stream = async_stream::stream! {
            info!(client = %client, "http_bot");
            let start = Local::now();
            let mut state = state;

            if state.skip_next {
                yield Turn::render(state, ButtonStates::all(ButtonUpdate::NoChange));
                return;
            }

            if state.is_first_round() {
                state = first_round_state(&state);
            }

            let prompt = state.prompt();
            let inputs: Vec<(ImageAttachment, ImageProcessMode)> = state
                .image_inputs()
                .into_iter()
                .map(|(image, mode)| (image.clone(), mode))
                .collect();
            let image_hashes = this.persist_images(&inputs, &start).await;
            let images = match worker_payloads(&inputs) {
                Ok(images) => images,
                Err(err) => {
                    error!(?err, "Failed to encode images for the worker");
                    state.set_last_content(Some(SERVER_ERROR_MSG.into()));
                    yield Turn::render(state, ButtonStates::retry_only());
                    return;
                }
            };

            let params = params.sanitized();
            let request = GenerateRequest {
                prompt: prompt.clone(),
                temperature: params.temperature,
                top_p: params.top_p,
                max_new_tokens: params.max_new_tokens,
                stop: state.stop_sequence().to_string(),
                images,
            };
            info!(
                prompt = %request.prompt,
                temperature = request.temperature,
                top_p = request.top_p,
                max_new_tokens = request.max_new_tokens,
                stop = %request.stop,
                images = ?image_hashes,
                "==== request ===="
            );

            state.set_last_content(Some(TYPING_MARKER.to_string().into()));
            yield Turn::render(state.clone(), ButtonStates::all(ButtonUpdate::Disable));

            let mut updates = match this.worker.generate_stream(request).await {
                Ok(updates) => updates,
                Err(err) => {
                    warn!(?err, "Model worker unreachable");
                    state.set_last_content(Some(SERVER_ERROR_MSG.into()));
                    yield Turn::render(state, ButtonStates::retry_only());
                    return;
                }
            };

            let prompt_chars = prompt.chars().count();
            while let Some(update) = updates.next().await {
                match update {
                    Ok(update) if update.is_ok() => {
                        let output = generated_suffix(&update.text, prompt_chars);
                        state.set_last_content(Some(format!("{output}{TYPING_MARKER}").into()));
                        yield Turn::render(state.clone(), ButtonStates::all(ButtonUpdate::Disable));
                        tokio::time::sleep(this.stream_delay).await;
                    }
                    Ok(update) => {
                        warn!(error_code = update.error_code, "Model worker reported an error");
                        let output = format!("{} (error_code: {})", update.text, update.error_code);
                        state.set_last_content(Some(output.into()));
                        yield Turn::render(state, ButtonStates::retry_only());
                        return;
                    }
                    Err(err) => {
                        warn!(?err, "Model worker stream broke");
                        state.set_last_content(Some(SERVER_ERROR_MSG.into()));
                        yield Turn::render(state, ButtonStates::retry_only());
                        return;
                    }
                }
            }

            let output = state
                .last_text()
                .map(|text| text.strip_suffix(TYPING_MARKER).unwrap_or(text).to_string())
                .unwrap_or_default();
            info!(output = %output, "http_bot finished");
            state.set_last_content(Some(output.into()));

            let finish = Local::now();
            let record = ChatRecord {
                tstamp: epoch_seconds(&finish),
                tag: ChatTag::Chat,
                start: epoch_seconds(&start),
                finish: epoch_seconds(&finish),
                state: state.to_record(),
                images: image_hashes,
                ip: client.clone(),
            };
            if let Err(err) = this.log_store.log_chat(&record).await {
                error!(?err, "Failed to write chat log");
            }

            yield Turn::render(state, ButtonStates::all(ButtonUpdate::Enable));
        };

        stream.boxed()
    }

    /// Persist attachments and return their content hashes. Failures are logged, not fatal.
    async fn persist_images(
        &self,
        inputs: &[(ImageAttachment, ImageProcessMode)],
        now: &DateTime<Local>,
    ) -> Vec<String> {
        let mut hashes = Vec::with_capacity(inputs.len());
        for (image, _) in inputs {
            match self.log_store.images().persist(image, now).await {
                Ok(persisted) => hashes.push(persisted.hash),
                Err(err) => {
                    error!(?err, "Failed to persist image");
                    hashes.push(image.content_hash().to_string());
                }
            }
        }
        hashes
    }
}

/// Base64 PNG payloads with each image's preprocessing applied.
fn worker_payloads(
    inputs: &[(ImageAttachment, ImageProcessMode)],
) -> Result<Vec<String>, AttachmentError> {
    inputs
        .iter()
        .map(|(image, mode)| image.worker_payload(*mode))
        .collect()
}

/// Re-template a first-round conversation into the model's canonical format.
fn first_round_state(state: &Conversation) -> Conversation {
    let mut fresh = template(FIRST_ROUND_TEMPLATE).unwrap_or_else(default_conversation);
    let first_user = state
        .messages
        .len()
        .checked_sub(2)
        .and_then(|idx| state.messages[idx].content.clone());
    let user = fresh.user_role().to_string();
    let assistant = fresh.assistant_role().to_string();
    fresh.append_message(user, first_user);
    fresh.append_message(assistant, None::<MessageContent>);
    fresh
}

/// Text generated beyond the prompt, trimmed.
fn generated_suffix(text: &str, prompt_chars: usize) -> &str {
    text.char_indices()
        .nth(prompt_chars)
        .map_or("", |(idx, _)| &text[idx..])
        .trim()
}
