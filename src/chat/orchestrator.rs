//! Session orchestrator: turns UI events into conversation state transitions.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::ui::{ButtonStates, ButtonUpdate, Turn, UiUpdate};
use crate::conversation::{
    Conversation, IMAGE_TOKEN, ImageAttachment, ImageProcessMode, MessageContent,
    default_conversation,
};
use crate::llm::{MAX_NEW_TOKENS_CAP, ModelWorker};
use crate::log_store::{LogResult, LogStore, VoteType};
use crate::moderation::{MODERATION_MSG, Moderator};

/// Hard cut-off for user text.
pub const MAX_TEXT_CHARS: usize = 3584;
/// Hard cut-off for user text when an image is attached.
pub const MAX_TEXT_CHARS_WITH_IMAGE: usize = 3500;
/// Default pause between streamed updates.
pub const DEFAULT_STREAM_DELAY: Duration = Duration::from_millis(30);

/// Sampling parameters chosen in the UI.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    /// Nucleus mass in `[0, 1]`.
    pub top_p: f32,
    /// Token budget.
    pub max_new_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.7,
            max_new_tokens: 512,
        }
    }
}

impl GenerationParams {
    /// Clamp to the ranges the worker accepts.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let clamp_unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            temperature: clamp_unit(self.temperature),
            top_p: clamp_unit(self.top_p),
            max_new_tokens: self.max_new_tokens.min(MAX_NEW_TOKENS_CAP),
        }
    }
}

/// Input submitted with the send button.
#[derive(Clone, Debug, Default)]
pub struct TextInput {
    /// Textbox content.
    pub text: String,
    /// Uploaded image.
    pub image: Option<ImageAttachment>,
    /// Selected preprocessing for the image.
    pub image_process_mode: ImageProcessMode,
}

/// Drives one conversation per browser session against a shared worker.
///
/// Cloning is cheap; collaborators are shared.
#[derive(Clone)]
pub struct Orchestrator {
    pub(super) worker: Arc<dyn ModelWorker>,
    pub(super) moderator: Option<Arc<dyn Moderator>>,
    pub(super) log_store: Arc<LogStore>,
    pub(super) stream_delay: Duration,
}

impl Orchestrator {
    /// Create an orchestrator. Moderation is enabled when a moderator is given.
    #[must_use]
    pub const fn new(
        worker: Arc<dyn ModelWorker>,
        moderator: Option<Arc<dyn Moderator>>,
        log_store: Arc<LogStore>,
    ) -> Self {
        Self {
            worker,
            moderator,
            log_store,
            stream_delay: DEFAULT_STREAM_DELAY,
        }
    }

    /// Override the pause between streamed updates.
    #[must_use]
    pub const fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    /// Shared model worker.
    #[must_use]
    pub const fn worker(&self) -> &Arc<dyn ModelWorker> {
        &self.worker
    }

    /// Shared log store.
    #[must_use]
    pub const fn log_store(&self) -> &Arc<LogStore> {
        &self.log_store
    }

    /// Fresh state for a newly loaded page.
    #[must_use]
    pub fn load_demo(&self, url_params: &serde_json::Value, client: &str) -> Conversation {
        info!(client, params = %url_params, "load_demo");
        default_conversation()
    }

    /// Append a user turn and a pending assistant turn.
    pub async fn add_text(&self, state: Conversation, input: TextInput, client: &str) -> Turn {
        info!(client, len = input.text.chars().count(), "add_text");
        let mut state = state;

        if input.text.is_empty() && input.image.is_none() {
            state.skip_next = true;
            let ui = UiUpdate::render_and_reset(&state, "", ButtonStates::all(ButtonUpdate::NoChange));
            return Turn { state, ui };
        }

        if let Some(moderator) = &self.moderator {
            if moderator.violates(&input.text).await {
                info!(client, "add_text rejected by moderation");
                state.skip_next = true;
                let ui = UiUpdate::render_and_reset(
                    &state,
                    MODERATION_MSG,
                    ButtonStates::all(ButtonUpdate::NoChange),
                );
                return Turn { state, ui };
            }
        }

        let content = match input.image {
            Some(image) => {
                let mut text = truncate_chars(&input.text, MAX_TEXT_CHARS_WITH_IMAGE).to_string();
                if !text.contains(IMAGE_TOKEN) {
                    text.insert_str(0, IMAGE_TOKEN);
                }
                if state.has_image() {
                    state = default_conversation();
                }
                MessageContent::WithImage {
                    text,
                    image,
                    mode: input.image_process_mode,
                }
            }
            None => MessageContent::Text(truncate_chars(&input.text, MAX_TEXT_CHARS).to_string()),
        };

        state.push_exchange(content);
        state.skip_next = false;
        let ui = UiUpdate::render_and_reset(&state, "", ButtonStates::all(ButtonUpdate::Disable));
        Turn { state, ui }
    }

    /// Reset the last reply to pending and re-apply the image mode to the last user turn.
    #[must_use]
    pub fn regenerate(
        &self,
        state: Conversation,
        image_process_mode: ImageProcessMode,
        client: &str,
    ) -> Turn {
        info!(client, "regenerate");
        let mut state = state;

        let len = state.messages.len();
        if len < state.offset + 2 {
            state.skip_next = true;
            let ui = UiUpdate::render_and_reset(&state, "", ButtonStates::all(ButtonUpdate::NoChange));
            return Turn { state, ui };
        }

        state.messages[len - 1].content = None;
        if let Some(MessageContent::WithImage { mode, .. }) = &mut state.messages[len - 2].content {
            *mode = image_process_mode;
        }
        state.skip_next = false;

        let ui = UiUpdate::render_and_reset(&state, "", ButtonStates::all(ButtonUpdate::Disable));
        Turn { state, ui }
    }

    /// Discard every turn.
    #[must_use]
    pub fn clear_history(&self, client: &str) -> Turn {
        info!(client, "clear_history");
        let state = default_conversation();
        let ui = UiUpdate::render_and_reset(&state, "", ButtonStates::all(ButtonUpdate::Disable));
        Turn { state, ui }
    }

    /// Record feedback on the last response.
    ///
    /// # Errors
    /// Returns an error if the vote cannot be written to the log store.
    pub async fn vote(
        &self,
        state: &Conversation,
        vote_type: VoteType,
        client: &str,
    ) -> LogResult<UiUpdate> {
        info!(client, vote = %vote_type, "vote_last_response");
        self.log_store.log_vote(vote_type, state, client).await?;
        Ok(UiUpdate::after_vote())
    }
}

/// Cut `text` to at most `max` characters.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> &str {
    text.char_indices().nth(max).map_or(text, |(idx, _)| &text[..idx])
}

#[cfg(test)]
pub(crate) mod tests {
    use futures::stream;

    use super::*;
    use crate::conversation::attachment::tests::solid;
    use crate::llm::{DecodeStream, DecodeUpdate, GenerateRequest, WorkerFuture, WorkerResult, WorkerStatus};
    use crate::moderation::ModerationFuture;

    /// Worker that replays fixed updates, prefixed by the request prompt on success.
    pub(crate) struct ScriptedWorker {
        pub(crate) script: Vec<WorkerResult<DecodeUpdate>>,
        pub(crate) echo_prompt: bool,
        pub(crate) requests: std::sync::Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedWorker {
        pub(crate) fn new(script: Vec<WorkerResult<DecodeUpdate>>) -> Self {
            Self {
                script,
                echo_prompt: true,
                requests: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl ModelWorker for ScriptedWorker {
        fn generate_stream(
            &self,
            request: GenerateRequest,
        ) -> WorkerFuture<'_, WorkerResult<DecodeStream>> {
            Box::pin(async move {
                let prompt = request.prompt.clone();
                if let Ok(mut seen) = self.requests.lock() {
                    seen.push(request);
                }
                let items: Vec<WorkerResult<DecodeUpdate>> = self
                    .script
                    .iter()
                    .map(|item| match item {
                        Ok(update) if update.is_ok() && self.echo_prompt => {
                            Ok(DecodeUpdate::ok(format!("{prompt}{}", update.text)))
                        }
                        Ok(update) => Ok(update.clone()),
                        Err(_) => Err(crate::llm::WorkerError::Unavailable("scripted".into())),
                    })
                    .collect();
                let boxed: DecodeStream = Box::pin(stream::iter(items));
                Ok(boxed)
            })
        }

        fn status(&self) -> WorkerFuture<'_, WorkerResult<WorkerStatus>> {
            Box::pin(async { Ok(WorkerStatus::default()) })
        }
    }

    struct AlwaysFlag;

    impl Moderator for AlwaysFlag {
        fn violates<'a>(&'a self, _text: &'a str) -> ModerationFuture<'a, bool> {
            Box::pin(async { true })
        }
    }

    pub(crate) fn orchestrator_with(
        worker: Arc<dyn ModelWorker>,
        log_dir: &std::path::Path,
    ) -> Orchestrator {
        Orchestrator::new(worker, None, Arc::new(LogStore::new(log_dir)))
            .with_stream_delay(Duration::ZERO)
    }

    fn orchestrator() -> Orchestrator {
        orchestrator_with(
            Arc::new(ScriptedWorker::new(vec![])),
            &std::env::temp_dir().join("docowl-web-orchestrator-tests"),
        )
    }

    fn text(text: &str) -> TextInput {
        TextInput {
            text: text.to_string(),
            ..TextInput::default()
        }
    }

    fn with_image(text: &str, shade: u8) -> TextInput {
        TextInput {
            text: text.to_string(),
            image: Some(solid(8, 6, [shade; 3])),
            image_process_mode: ImageProcessMode::Default,
        }
    }

    #[tokio::test]
    async fn test_empty_input_sets_skip_next() {
        let orch = orchestrator();
        let turn = orch.add_text(default_conversation(), text(""), "ip").await;

        assert!(turn.state.skip_next);
        assert!(turn.state.messages.is_empty());
        assert_eq!(turn.ui.buttons, ButtonStates::all(ButtonUpdate::NoChange));
    }

    #[tokio::test]
    async fn test_long_text_is_truncated() {
        let orch = orchestrator();
        let long = "é".repeat(MAX_TEXT_CHARS + 100);
        let turn = orch.add_text(default_conversation(), text(&long), "ip").await;

        let content = turn.state.messages[0].content.clone();
        assert_eq!(
            content.map(|c| c.text().chars().count()),
            Some(MAX_TEXT_CHARS)
        );
        assert!(turn.state.messages[1].content.is_none());
        assert!(!turn.state.skip_next);
    }

    #[tokio::test]
    async fn test_image_text_is_truncated_and_prefixed() {
        let orch = orchestrator();
        let long = "x".repeat(4000);
        let turn = orch
            .add_text(default_conversation(), with_image(&long, 0), "ip")
            .await;

        let Some(MessageContent::WithImage { text, mode, .. }) = &turn.state.messages[0].content
        else {
            panic!("expected an image turn");
        };
        assert!(text.starts_with(IMAGE_TOKEN));
        assert_eq!(text[IMAGE_TOKEN.len()..].chars().count(), MAX_TEXT_CHARS_WITH_IMAGE);
        assert_eq!(*mode, ImageProcessMode::Default);
    }

    #[tokio::test]
    async fn test_existing_image_token_is_not_duplicated() {
        let orch = orchestrator();
        let turn = orch
            .add_text(default_conversation(), with_image("<|image|>Parse.", 0), "ip")
            .await;
        assert_eq!(turn.state.messages[0].content.as_ref().map(MessageContent::text), Some("<|image|>Parse."));
    }

    #[tokio::test]
    async fn test_second_image_starts_fresh_conversation() {
        let orch = orchestrator();
        let first = orch
            .add_text(default_conversation(), with_image("one", 1), "ip")
            .await;
        let mut state = first.state;
        state.set_last_content(Some("answer".into()));
        let followup = orch.add_text(state, text("more"), "ip").await;
        assert_eq!(followup.state.messages.len(), 4);

        let mut state = followup.state;
        state.set_last_content(Some("answer 2".into()));
        let second = orch.add_text(state, with_image("two", 2), "ip").await;

        assert_eq!(second.state.messages.len(), 2);
        assert_eq!(second.state.images().len(), 1);
    }

    #[tokio::test]
    async fn test_moderated_input_is_replaced_by_message() {
        let orch = orchestrator();
        let orch = Orchestrator {
            moderator: Some(Arc::new(AlwaysFlag)),
            ..orch
        };
        let turn = orch.add_text(default_conversation(), text("bad"), "ip").await;

        assert!(turn.state.skip_next);
        assert!(turn.state.messages.is_empty());
        assert_eq!(turn.ui.textbox.as_deref(), Some(MODERATION_MSG));
    }

    #[tokio::test]
    async fn test_regenerate_replaces_mode_and_clears_reply() {
        let orch = orchestrator();
        let turn = orch
            .add_text(default_conversation(), with_image("text", 0), "ip")
            .await;
        let mut state = turn.state;
        state.set_last_content(Some("old answer".into()));
        state.skip_next = true;

        let regenerated = orch.regenerate(state, ImageProcessMode::Pad, "ip");

        let messages = &regenerated.state.messages;
        assert!(messages[1].content.is_none());
        assert!(matches!(
            &messages[0].content,
            Some(MessageContent::WithImage { text, mode: ImageProcessMode::Pad, .. })
                if text == "<|image|>text"
        ));
        assert!(!regenerated.state.skip_next);
    }

    #[test]
    fn test_regenerate_on_empty_conversation_is_noop() {
        let orch = orchestrator();
        let turn = orch.regenerate(default_conversation(), ImageProcessMode::Crop, "ip");
        assert!(turn.state.skip_next);
        assert!(turn.state.messages.is_empty());
    }

    #[tokio::test]
    async fn test_clear_history_always_empty() {
        let orch = orchestrator();
        let turn = orch.add_text(default_conversation(), text("hello"), "ip").await;
        assert_eq!(turn.state.messages.len(), 2);

        let cleared = orch.clear_history("ip");
        assert!(cleared.state.messages.is_empty());
        assert_eq!(cleared.ui.textbox.as_deref(), Some(""));
        assert!(cleared.ui.clear_image);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_generation_params_are_sanitized() {
        let params = GenerationParams {
            temperature: 3.0,
            top_p: f32::NAN,
            max_new_tokens: 100_000,
        }
        .sanitized();
        assert!((params.temperature - 1.0).abs() < f32::EPSILON);
        assert!(params.top_p.abs() < f32::EPSILON);
        assert_eq!(params.max_new_tokens, MAX_NEW_TOKENS_CAP);
    }
}
