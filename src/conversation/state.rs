//! Per-session conversation state and prompt rendering.

use serde::{Deserialize, Serialize};

use super::attachment::{ImageAttachment, ImageProcessMode};
use super::template::SeparatorStyle;

/// Placeholder token marking where the image is injected into the prompt.
pub const IMAGE_TOKEN: &str = "<|image|>";

/// Content of a single turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// A user turn carrying an image.
    WithImage {
        /// Text part, including the image token.
        text: String,
        /// Attached image.
        image: ImageAttachment,
        /// Preprocessing selected for the image.
        mode: ImageProcessMode,
    },
}

impl MessageContent {
    /// Text part of the content.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::WithImage { text, .. } => text,
        }
    }

    /// Attached image, if any.
    #[must_use]
    pub const fn image(&self) -> Option<&ImageAttachment> {
        match self {
            Self::Text(_) => None,
            Self::WithImage { image, .. } => Some(image),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// One turn: a role label and its content (`None` while a reply is pending).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Role label, one of the conversation roles.
    pub role: String,
    /// Content, `None` for a pending assistant reply.
    pub content: Option<MessageContent>,
}

/// Conversation state owned by one browser session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    /// System preamble.
    pub system: String,
    /// User and assistant role labels.
    pub roles: [String; 2],
    /// Turns in insertion order.
    pub messages: Vec<Message>,
    /// Index where the first round starts.
    pub offset: usize,
    /// Separator style.
    pub sep_style: SeparatorStyle,
    /// Primary separator.
    pub sep: String,
    /// Secondary separator.
    pub sep2: String,
    /// Template version label.
    pub version: String,
    /// When set, the next generation request is a no-op.
    pub skip_next: bool,
}

impl Conversation {
    /// Build an empty conversation with the given template parameters.
    #[must_use]
    pub fn new(
        system: &str,
        roles: [&str; 2],
        sep_style: SeparatorStyle,
        sep: &str,
        sep2: &str,
        version: &str,
    ) -> Self {
        Self {
            system: system.to_string(),
            roles: roles.map(str::to_string),
            messages: Vec::new(),
            offset: 0,
            sep_style,
            sep: sep.to_string(),
            sep2: sep2.to_string(),
            version: version.to_string(),
            skip_next: false,
        }
    }

    /// Label of the human participant.
    #[must_use]
    pub fn user_role(&self) -> &str {
        &self.roles[0]
    }

    /// Label of the model participant.
    #[must_use]
    pub fn assistant_role(&self) -> &str {
        &self.roles[1]
    }

    /// Append a turn.
    pub fn append_message(&mut self, role: impl Into<String>, content: Option<MessageContent>) {
        self.messages.push(Message {
            role: role.into(),
            content,
        });
    }

    /// Append a user turn followed by a pending assistant turn.
    pub fn push_exchange(&mut self, user_content: MessageContent) {
        let user = self.user_role().to_string();
        let assistant = self.assistant_role().to_string();
        self.append_message(user, Some(user_content));
        self.append_message(assistant, None);
    }

    /// Replace the content of the last turn.
    pub fn set_last_content(&mut self, content: Option<MessageContent>) {
        if let Some(last) = self.messages.last_mut() {
            last.content = content;
        }
    }

    /// Text of the last turn, if it has any.
    #[must_use]
    pub fn last_text(&self) -> Option<&str> {
        self.messages
            .last()
            .and_then(|m| m.content.as_ref())
            .map(MessageContent::text)
    }

    /// True when this conversation is exactly one user turn plus its pending reply.
    #[must_use]
    pub fn is_first_round(&self) -> bool {
        self.messages.len() == self.offset + 2
    }

    /// Images attached to user turns after `offset`, with their preprocessing mode.
    #[must_use]
    pub fn image_inputs(&self) -> Vec<(&ImageAttachment, ImageProcessMode)> {
        self.messages
            .iter()
            .skip(self.offset)
            .step_by(2)
            .filter_map(|m| match m.content.as_ref()? {
                MessageContent::WithImage { image, mode, .. } => Some((image, *mode)),
                MessageContent::Text(_) => None,
            })
            .collect()
    }

    /// Images attached to user turns after `offset`.
    #[must_use]
    pub fn images(&self) -> Vec<&ImageAttachment> {
        self.image_inputs()
            .into_iter()
            .map(|(image, _)| image)
            .collect()
    }

    /// Whether any user turn already embeds an image.
    #[must_use]
    pub fn has_image(&self) -> bool {
        !self.images().is_empty()
    }

    /// Stop sequence for the worker, derived from the separator style.
    #[must_use]
    pub fn stop_sequence(&self) -> &str {
        if self.sep_style.stops_on_primary_sep() {
            &self.sep
        } else {
            &self.sep2
        }
    }

    /// Render every turn into the prompt string expected by the model.
    #[must_use]
    pub fn prompt(&self) -> String {
        let seps = [self.sep.as_str(), self.sep2.as_str()];
        let mut ret = String::new();

        match self.sep_style {
            SeparatorStyle::Single => {
                ret.push_str(&self.system);
                ret.push_str(&self.sep);
                for message in &self.messages {
                    ret.push_str(&message.role);
                    match &message.content {
                        Some(content) => {
                            ret.push_str(": ");
                            ret.push_str(content.text());
                            ret.push_str(&self.sep);
                        }
                        None => ret.push(':'),
                    }
                }
            }
            SeparatorStyle::Two | SeparatorStyle::TwoNoSys => {
                if self.sep_style == SeparatorStyle::Two {
                    ret.push_str(&self.system);
                    ret.push_str(seps[0]);
                }
                for (i, message) in self.messages.iter().enumerate() {
                    ret.push_str(&message.role);
                    match &message.content {
                        Some(content) => {
                            ret.push_str(": ");
                            ret.push_str(content.text());
                            ret.push_str(seps[i % 2]);
                        }
                        None => ret.push(':'),
                    }
                }
            }
            SeparatorStyle::Mpt => {
                ret.push_str(&self.system);
                ret.push_str(&self.sep);
                for message in &self.messages {
                    ret.push_str(&message.role);
                    if let Some(content) = &message.content {
                        ret.push_str(content.text());
                        ret.push_str(&self.sep);
                    }
                }
            }
            SeparatorStyle::Plain => {
                ret.push_str(&self.system);
                for (i, message) in self.messages.iter().enumerate() {
                    if let Some(content) = &message.content {
                        ret.push_str(content.text());
                        ret.push_str(seps[i % 2]);
                    }
                }
            }
        }

        ret
    }

    /// Snapshot suitable for the JSON log store (image bytes omitted).
    #[must_use]
    pub fn to_record(&self) -> ConversationRecord {
        ConversationRecord {
            system: self.system.clone(),
            roles: self.roles.clone(),
            messages: self
                .messages
                .iter()
                .map(|m| {
                    (
                        m.role.clone(),
                        m.content.as_ref().map(|c| c.text().to_string()),
                    )
                })
                .collect(),
            offset: self.offset,
            sep_style: self.sep_style,
            sep: self.sep.clone(),
            sep2: self.sep2.clone(),
            version: self.version.clone(),
            skip_next: self.skip_next,
        }
    }
}

/// Serialized conversation written into vote and chat log records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// System preamble.
    pub system: String,
    /// Role labels.
    pub roles: [String; 2],
    /// `[role, text]` pairs.
    pub messages: Vec<(String, Option<String>)>,
    /// First-round offset.
    pub offset: usize,
    /// Separator style.
    pub sep_style: SeparatorStyle,
    /// Primary separator.
    pub sep: String,
    /// Secondary separator.
    pub sep2: String,
    /// Template version.
    pub version: String,
    /// Pending skip flag.
    pub skip_next: bool,
}
