//! Content moderation for user input.
//!
//! The classifier itself is external; this module only defines the contract
//! and two backends:
//! - OpenAI moderation endpoint
//! - Local regex blocklist

pub mod blocklist;
pub mod openai;

pub use blocklist::BlocklistModerator;
pub use openai::OpenAiModerator;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Message shown instead of a turn that violates the moderation policy.
pub const MODERATION_MSG: &str =
    "YOUR INPUT VIOLATES OUR CONTENT MODERATION GUIDELINES. PLEASE TRY AGAIN.";

/// Boxed future type for moderation checks.
pub type ModerationFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors raised while building a moderator.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// Blocklist pattern failed to compile.
    #[error("invalid blocklist pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// Blocklist file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decides whether user text violates the content policy.
pub trait Moderator: Send + Sync {
    /// Returns `true` when `text` must be rejected.
    ///
    /// Backend failures are treated as "not flagged".
    fn violates<'a>(&'a self, text: &'a str) -> ModerationFuture<'a, bool>;
}
