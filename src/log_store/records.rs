//! JSON-lines record shapes written by the log store.

use std::fmt;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationRecord;

/// Kind of feedback left on the last response.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    /// Thumbs up.
    Upvote,
    /// Thumbs down.
    Downvote,
    /// Inappropriate answer.
    Flag,
}

impl VoteType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One vote event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Event time, seconds since epoch.
    pub tstamp: f64,
    /// Vote kind.
    #[serde(rename = "type")]
    pub vote_type: VoteType,
    /// Conversation at vote time.
    pub state: ConversationRecord,
    /// Client address.
    pub ip: String,
}

/// Marker serialized as `"type": "chat"`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTag {
    /// Completed chat turn.
    #[default]
    Chat,
}

/// One completed chat turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Write time, seconds since epoch.
    pub tstamp: f64,
    /// Always `chat`.
    #[serde(rename = "type")]
    pub tag: ChatTag,
    /// Generation start, seconds since epoch.
    pub start: f64,
    /// Generation completion, seconds since epoch.
    pub finish: f64,
    /// Final conversation state.
    pub state: ConversationRecord,
    /// Content hashes of the images sent with the turn.
    pub images: Vec<String>,
    /// Client address.
    pub ip: String,
}

/// Seconds since epoch, rounded to four decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epoch_seconds<Tz: TimeZone>(ts: &DateTime<Tz>) -> f64 {
    let secs = ts.timestamp_micros() as f64 / 1_000_000.0;
    (secs * 10_000.0).round() / 10_000.0
}
