//! Session orchestration: UI events in, conversation states and render updates out.

pub mod bot;
pub mod orchestrator;
pub mod ui;

pub use bot::{BotStream, SERVER_ERROR_MSG, TYPING_MARKER};
pub use orchestrator::{
    GenerationParams, MAX_TEXT_CHARS, MAX_TEXT_CHARS_WITH_IMAGE, Orchestrator, TextInput,
};
pub use ui::{ButtonStates, ButtonUpdate, Turn, UiEvent, UiUpdate};
