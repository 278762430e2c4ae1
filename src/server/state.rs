//! Application state shared across all request handlers.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::sessions::SessionStore;
use crate::chat::{GenerationParams, Orchestrator};
use crate::config::{ModelListMode, ModerationBackend, ServerConfig};
use crate::llm::{HttpModelWorker, ModelSpec};
use crate::log_store::LogStore;
use crate::moderation::{BlocklistModerator, Moderator, OpenAiModerator};

const TITLE_MARKDOWN: &str = "# mPLUG-DocOwl 1.5: Unified Structure Learning for OCR-free Document Understanding";

const TOS_MARKDOWN: &str = "### Terms of use\n\
By using this service, users agree that it is a research preview for non-commercial use only. \
It offers limited safety measures and may generate offensive content. \
It must not be used for any illegal, harmful, violent, racist, or sexual purposes. \
The service may collect user dialogue data for future research.";

const LEARN_MORE_MARKDOWN: &str = "### License\n\
The service is a research preview intended for non-commercial use only, \
subject to the model license and the terms of use of the data it was trained on.";

/// Sample prompts offered under the textbox.
pub const EXAMPLE_PROMPTS: [&str; 6] = [
    "What is this schedule for? Give detailed explanation.",
    "Parse texts in the image.",
    "Convert the table into Markdown format.",
    "What is unusual about this image? Provide detailed explanation.",
    "Convert the illustration into Markdown language.",
    "What is the name of the movie in the poster? Provide detailed explanation.",
];

/// Page chrome and widget defaults served to the browser.
#[derive(Clone, Debug, Serialize)]
pub struct UiConfig {
    /// Page title; hidden in embed mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_markdown: Option<&'static str>,
    /// Terms of use; hidden in embed mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_markdown: Option<&'static str>,
    /// License note; hidden in embed mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learn_more_markdown: Option<&'static str>,
    /// Model shown in the page.
    pub model_name: String,
    /// Slider defaults.
    pub params: GenerationParams,
    /// Choices for the image preprocessing radio.
    pub image_process_modes: [&'static str; 4],
    /// Clickable sample prompts.
    pub examples: &'static [&'static str],
}

impl UiConfig {
    /// Build the page configuration for the given model.
    #[must_use]
    pub fn new(model: &ModelSpec, embed: bool) -> Self {
        let chrome = |text| (!embed).then_some(text);
        Self {
            title_markdown: chrome(TITLE_MARKDOWN),
            tos_markdown: chrome(TOS_MARKDOWN),
            learn_more_markdown: chrome(LEARN_MORE_MARKDOWN),
            model_name: model.model_name().to_string(),
            params: GenerationParams::default(),
            image_process_modes: ["Crop", "Resize", "Pad", "Default"],
            examples: &EXAMPLE_PROMPTS,
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Session orchestrator.
    pub orchestrator: Orchestrator,
    /// Live sessions.
    pub sessions: Arc<SessionStore>,
    /// Bounds concurrent generations.
    pub generation_permits: Arc<Semaphore>,
    /// Model the worker is expected to serve.
    pub model: ModelSpec,
    /// When to re-query the worker model list.
    pub model_list_mode: ModelListMode,
    /// Browser page configuration.
    pub ui: UiConfig,
}

impl AppState {
    /// Assemble state from already-built parts.
    #[must_use]
    pub fn new(
        orchestrator: Orchestrator,
        sessions: Arc<SessionStore>,
        concurrency_count: usize,
        model: ModelSpec,
        model_list_mode: ModelListMode,
        embed: bool,
    ) -> Arc<Self> {
        let ui = UiConfig::new(&model, embed);
        Arc::new(Self {
            orchestrator,
            sessions,
            generation_permits: Arc::new(Semaphore::new(concurrency_count)),
            model,
            model_list_mode,
            ui,
        })
    }

    /// Build the worker client, moderator and log store described by `config`.
    ///
    /// # Errors
    /// Returns an error if a collaborator cannot be constructed.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Arc<Self>> {
        let worker = HttpModelWorker::new(config.worker_url.as_str())
            .context("Failed to create model worker client")?;

        let moderator: Option<Arc<dyn Moderator>> = match &config.moderation {
            ModerationBackend::Disabled => None,
            ModerationBackend::OpenAi { api_key } => Some(Arc::new(
                OpenAiModerator::new(api_key.as_str()).context("Failed to create moderation client")?,
            )),
            ModerationBackend::Blocklist { path } => Some(Arc::new(
                BlocklistModerator::from_file(path)
                    .with_context(|| format!("Failed to load blocklist {}", path.display()))?,
            )),
        };

        let orchestrator = Orchestrator::new(
            Arc::new(worker),
            moderator,
            Arc::new(LogStore::new(config.log_dir.clone())),
        )
        .with_stream_delay(config.stream_delay);

        Ok(Self::new(
            orchestrator,
            Arc::new(SessionStore::new(config.session_ttl)),
            config.concurrency_count,
            config.model.clone(),
            config.model_list_mode,
            config.embed,
        ))
    }

    /// Ask the worker which models it serves and warn when ours is missing.
    ///
    /// Returns whether the configured model was reported.
    pub async fn probe_worker(&self) -> bool {
        match self.orchestrator.worker().status().await {
            Ok(status) => {
                let served = status.model_names.iter().any(|name| self.model.matches(name));
                if served {
                    info!(
                        models = ?status.model_names,
                        queue_length = status.queue_length,
                        "Model worker is ready"
                    );
                } else {
                    warn!(
                        expected = %self.model.path,
                        models = ?status.model_names,
                        "Model worker does not report the configured model"
                    );
                }
                served
            }
            Err(e) => {
                warn!(error = %e, "Model worker is unreachable");
                false
            }
        }
    }
}
