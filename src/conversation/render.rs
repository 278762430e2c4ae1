//! Chatbot view of a conversation, as consumed by the browser UI.

use serde::Serialize;

use super::state::{Conversation, IMAGE_TOKEN, MessageContent};

/// User side of a chat row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UserCell {
    /// Message text with the image token removed.
    pub text: String,
    /// Inline JPEG `data:` URI of the downscaled attached image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// One exchange in the chatbot widget.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ChatRow {
    /// User turn.
    pub user: Option<UserCell>,
    /// Assistant turn, `None` while pending.
    pub assistant: Option<String>,
}

impl Conversation {
    /// Pair turns into chatbot rows, starting at `offset`.
    #[must_use]
    pub fn to_chatbot(&self) -> Vec<ChatRow> {
        let mut rows: Vec<ChatRow> = Vec::new();

        for (i, message) in self.messages.iter().skip(self.offset).enumerate() {
            if i % 2 == 0 {
                let user = message.content.as_ref().map(|content| match content {
                    MessageContent::Text(text) => UserCell {
                        text: text.clone(),
                        image: None,
                    },
                    MessageContent::WithImage { text, image, .. } => UserCell {
                        text: text.replace(IMAGE_TOKEN, ""),
                        image: Some(image.thumbnail_uri().to_string()),
                    },
                });
                rows.push(ChatRow {
                    user,
                    assistant: None,
                });
            } else if let Some(row) = rows.last_mut() {
                row.assistant = message
                    .content
                    .as_ref()
                    .map(|content| content.text().to_string());
            }
        }

        rows
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use crate::conversation::attachment::ImageProcessMode;
    use crate::conversation::attachment::tests::solid;
    use crate::conversation::state::MessageContent;
    use crate::conversation::template::default_conversation;

    #[test]
    fn test_rows_pair_user_and_assistant() {
        let mut conv = default_conversation();
        conv.push_exchange("hello".into());
        conv.set_last_content(Some("hi there".into()));
        conv.push_exchange("bye".into());

        let rows = conv.to_chatbot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].assistant.as_deref(), Some("hi there"));
        assert_eq!(rows[1].user.as_ref().map(|u| u.text.as_str()), Some("bye"));
        assert!(rows[1].assistant.is_none());
    }

    #[test]
    fn test_image_row_strips_token_and_inlines_image() {
        let mut conv = default_conversation();
        conv.push_exchange(MessageContent::WithImage {
            text: "<|image|>Parse texts in the image.".to_string(),
            image: solid(1600, 1200, [10, 20, 30]),
            mode: ImageProcessMode::Default,
        });

        let rows = conv.to_chatbot();
        let user = rows[0].user.clone();
        assert_eq!(
            user.as_ref().map(|u| u.text.as_str()),
            Some("Parse texts in the image.")
        );
        assert!(
            user.and_then(|u| u.image)
                .is_some_and(|uri| uri.starts_with("data:image/jpeg;base64,"))
        );
    }

    #[test]
    fn test_image_row_uses_thumbnail_not_full_upload() {
        let image = solid(3000, 2000, [200, 200, 200]);
        let mut conv = default_conversation();
        conv.push_exchange(MessageContent::WithImage {
            text: "<|image|>Parse.".to_string(),
            image: image.clone(),
            mode: ImageProcessMode::Default,
        });

        let uri = conv.to_chatbot()[0]
            .user
            .as_ref()
            .and_then(|u| u.image.clone())
            .unwrap();
        assert_eq!(uri, image.thumbnail_uri());

        let encoded = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let thumb = image::load_from_memory(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (600, 400));
    }
}
