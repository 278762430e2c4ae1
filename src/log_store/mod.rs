//! Date-partitioned JSON-lines log of votes and chat turns, plus image artifacts.

pub mod error;
pub mod images;
pub mod records;

pub use error::{LogResult, LogStoreError};
pub use images::{ImageStore, PersistedImage};
pub use records::{ChatRecord, ChatTag, VoteRecord, VoteType, epoch_seconds};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::conversation::Conversation;

/// Log store rooted at a directory.
pub struct LogStore {
    root: PathBuf,
    images: ImageStore,
    append_lock: Mutex<()>,
}

impl LogStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let images = ImageStore::new(&root);
        Self {
            root,
            images,
            append_lock: Mutex::new(()),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Image artifact store.
    #[must_use]
    pub const fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Conversation log file for the day of `now`.
    #[must_use]
    pub fn conv_log_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.root
            .join(format!("{}-conv.json", now.format("%Y-%m-%d")))
    }

    /// Append one record as a JSON line to today's conversation log.
    ///
    /// # Errors
    /// Returns an error if serialization or the file write fails.
    pub async fn append<T: Serialize>(&self, record: &T) -> LogResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.conv_log_path(&Local::now());
        let _guard = self.append_lock.lock().await;
        tokio::fs::create_dir_all(&self.root).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Record a vote on the last response.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub async fn log_vote(
        &self,
        vote_type: VoteType,
        state: &Conversation,
        ip: &str,
    ) -> LogResult<()> {
        let record = VoteRecord {
            tstamp: epoch_seconds(&Local::now()),
            vote_type,
            state: state.to_record(),
            ip: ip.to_string(),
        };
        self.append(&record).await
    }

    /// Record a completed chat turn.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub async fn log_chat(&self, record: &ChatRecord) -> LogResult<()> {
        self.append(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::default_conversation;

    #[tokio::test]
    async fn test_votes_append_one_line_each() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LogStore::new(tmp.path());
        let mut conv = default_conversation();
        conv.push_exchange("hello".into());
        conv.set_last_content(Some("hi".into()));

        assert!(store.log_vote(VoteType::Upvote, &conv, "1.2.3.4").await.is_ok());
        assert!(store.log_vote(VoteType::Flag, &conv, "1.2.3.4").await.is_ok());

        let contents =
            std::fs::read_to_string(store.conv_log_path(&Local::now())).unwrap_or_default();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "upvote");
        assert_eq!(lines[1]["type"], "flag");
        assert_eq!(lines[1]["state"]["messages"][1][1], "hi");
    }

    #[test]
    fn test_conv_log_is_date_named() {
        let store = LogStore::new("/var/log/docowl");
        let now = Local::now();
        let expected = format!("/var/log/docowl/{}-conv.json", now.format("%Y-%m-%d"));
        assert_eq!(store.conv_log_path(&now), PathBuf::from(expected));
    }
}
