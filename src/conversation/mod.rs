//! Conversation data model: turns, templates and prompt rendering.

pub mod attachment;
pub mod render;
pub mod state;
pub mod template;

pub use attachment::{AttachmentError, ImageAttachment, ImageProcessMode};
pub use render::{ChatRow, UserCell};
pub use state::{Conversation, ConversationRecord, IMAGE_TOKEN, Message, MessageContent};
pub use template::{SeparatorStyle, default_conversation, template};
