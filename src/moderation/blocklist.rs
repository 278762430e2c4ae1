//! Local blocklist moderation using case-insensitive whole-word patterns.

use std::path::Path;

use regex::{Regex, RegexBuilder};

use super::{ModerationError, ModerationFuture, Moderator};

/// Moderator that flags text matching any blocklisted term.
#[derive(Debug)]
pub struct BlocklistModerator {
    pattern: Option<Regex>,
}

impl BlocklistModerator {
    /// Build from a list of terms. Terms are matched literally, as whole words.
    ///
    /// # Errors
    /// Returns an error if the combined pattern cannot be compiled.
    pub fn new<I, S>(terms: I) -> Result<Self, ModerationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| regex::escape(&t))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Load terms from a file, one per line. Lines starting with `#` are ignored.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the pattern cannot be compiled.
    pub fn from_file(path: &Path) -> Result<Self, ModerationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::new(contents.lines().filter(|line| !line.trim_start().starts_with('#')))
    }

    fn is_blocked(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }
}

impl Moderator for BlocklistModerator {
    fn violates<'a>(&'a self, text: &'a str) -> ModerationFuture<'a, bool> {
        Box::pin(async move { self.is_blocked(text) })
    }
}
