//! UI update instructions and the event table driving the session orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conversation::{ChatRow, Conversation};

/// Interactivity change for one button.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonUpdate {
    /// Leave the button as it is.
    #[default]
    NoChange,
    /// Make the button clickable.
    Enable,
    /// Grey the button out.
    Disable,
}

/// Updates for the five action buttons, in display order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ButtonStates {
    /// Upvote button.
    pub upvote: ButtonUpdate,
    /// Downvote button.
    pub downvote: ButtonUpdate,
    /// Flag button.
    pub flag: ButtonUpdate,
    /// Regenerate button.
    pub regenerate: ButtonUpdate,
    /// Clear button.
    pub clear: ButtonUpdate,
}

impl ButtonStates {
    /// Same update for every button.
    #[must_use]
    pub const fn all(update: ButtonUpdate) -> Self {
        Self {
            upvote: update,
            downvote: update,
            flag: update,
            regenerate: update,
            clear: update,
        }
    }

    /// Votes disabled, regenerate and clear enabled: used after a failed turn.
    #[must_use]
    pub const fn retry_only() -> Self {
        Self {
            upvote: ButtonUpdate::Disable,
            downvote: ButtonUpdate::Disable,
            flag: ButtonUpdate::Disable,
            regenerate: ButtonUpdate::Enable,
            clear: ButtonUpdate::Enable,
        }
    }

    /// Vote buttons disabled, others untouched: used after a vote.
    #[must_use]
    pub const fn votes_disabled() -> Self {
        Self {
            upvote: ButtonUpdate::Disable,
            downvote: ButtonUpdate::Disable,
            flag: ButtonUpdate::Disable,
            regenerate: ButtonUpdate::NoChange,
            clear: ButtonUpdate::NoChange,
        }
    }
}

/// Render instructions returned by every handler.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct UiUpdate {
    /// Chatbot rows; `None` leaves the widget untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chatbot: Option<Vec<ChatRow>>,
    /// New textbox value; `None` leaves it untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub textbox: Option<String>,
    /// Whether the image box should be reset.
    pub clear_image: bool,
    /// Button interactivity.
    pub buttons: ButtonStates,
}

impl UiUpdate {
    /// Chatbot re-render with the given buttons.
    #[must_use]
    pub fn render(state: &Conversation, buttons: ButtonStates) -> Self {
        Self {
            chatbot: Some(state.to_chatbot()),
            textbox: None,
            clear_image: false,
            buttons,
        }
    }

    /// Chatbot re-render that also resets the input widgets.
    #[must_use]
    pub fn render_and_reset(state: &Conversation, textbox: &str, buttons: ButtonStates) -> Self {
        Self {
            chatbot: Some(state.to_chatbot()),
            textbox: Some(textbox.to_string()),
            clear_image: true,
            buttons,
        }
    }

    /// Update produced by a vote: clears the textbox and locks the vote buttons.
    #[must_use]
    pub const fn after_vote() -> Self {
        Self {
            chatbot: None,
            textbox: Some(String::new()),
            clear_image: false,
            buttons: ButtonStates::votes_disabled(),
        }
    }
}

/// A new conversation state paired with what the UI should show.
#[derive(Clone, Debug)]
pub struct Turn {
    /// State after the handler ran.
    pub state: Conversation,
    /// Render instructions.
    pub ui: UiUpdate,
}

impl Turn {
    /// Pair a state with a chatbot re-render.
    #[must_use]
    pub fn render(state: Conversation, buttons: ButtonStates) -> Self {
        let ui = UiUpdate::render(&state, buttons);
        Self { state, ui }
    }
}

/// Browser events understood by the server.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UiEvent {
    /// Page load.
    Load,
    /// Send button or textbox submit.
    AddText,
    /// Regenerate button.
    Regenerate,
    /// Clear button.
    Clear,
    /// Upvote button.
    Upvote,
    /// Downvote button.
    Downvote,
    /// Flag button.
    Flag,
    /// Streaming generation following `add_text` or `regenerate`.
    Generate,
}

impl UiEvent {
    /// Every event, in registration order.
    pub const ALL: [Self; 8] = [
        Self::Load,
        Self::AddText,
        Self::Regenerate,
        Self::Clear,
        Self::Upvote,
        Self::Downvote,
        Self::Flag,
        Self::Generate,
    ];

    /// Event name as used in routes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::AddText => "add_text",
            Self::Regenerate => "regenerate",
            Self::Clear => "clear",
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
            Self::Flag => "flag",
            Self::Generate => "generate",
        }
    }

    /// Whether this event answers with a stream of updates.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Generate)
    }
}

impl fmt::Display for UiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UiEvent {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == value)
            .ok_or_else(|| value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_resolve() {
        for event in UiEvent::ALL {
            assert_eq!(event.as_str().parse::<UiEvent>(), Ok(event));
        }
        assert!("stop".parse::<UiEvent>().is_err());
        assert!(UiEvent::Generate.is_streaming());
        assert!(!UiEvent::AddText.is_streaming());
    }

    #[test]
    fn test_vote_update_locks_only_votes() {
        let ui = UiUpdate::after_vote();
        assert_eq!(ui.textbox.as_deref(), Some(""));
        assert_eq!(ui.buttons.upvote, ButtonUpdate::Disable);
        assert_eq!(ui.buttons.regenerate, ButtonUpdate::NoChange);
        let json = serde_json::to_value(&ui).unwrap_or_default();
        assert!(json.get("chatbot").is_none());
        assert_eq!(json["buttons"]["flag"], "disable");
    }
}
