//! Write-once image artifacts keyed by content hash.

use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use lru::LruCache;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::LogResult;
use crate::conversation::ImageAttachment;

/// Directory under the log root holding persisted images.
pub const IMAGE_DIR: &str = "serve_images";

/// Default number of recently persisted paths remembered in memory.
const DEFAULT_KNOWN_CAPACITY: usize = 1024;

/// Outcome of persisting one image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PersistedImage {
    /// Content hash.
    pub hash: String,
    /// Artifact path.
    pub path: PathBuf,
    /// `false` when the artifact already existed.
    pub written: bool,
}

/// Append-only image store shared by every session.
pub struct ImageStore {
    root: PathBuf,
    known: Mutex<LruCache<PathBuf, ()>>,
}

impl ImageStore {
    /// Create a store rooted at `<log_dir>/serve_images`.
    #[must_use]
    pub fn new(log_dir: &Path) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_KNOWN_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            root: log_dir.join(IMAGE_DIR),
            known: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Path of the artifact for `hash` on the given day.
    #[must_use]
    pub fn artifact_path(&self, hash: &str, now: &DateTime<Local>) -> PathBuf {
        self.root
            .join(now.format("%Y-%m-%d").to_string())
            .join(format!("{hash}.jpg"))
    }

    /// Persist `image` as a JPEG unless an artifact with the same hash already exists today.
    ///
    /// Concurrent writers of identical content are safe: the file is opened with
    /// `create_new`, and losing the race counts as already persisted.
    ///
    /// # Errors
    /// Returns an error if the image cannot be encoded or the file cannot be written.
    pub async fn persist(
        &self,
        image: &ImageAttachment,
        now: &DateTime<Local>,
    ) -> LogResult<PersistedImage> {
        let hash = image.content_hash().to_string();
        let path = self.artifact_path(&hash, now);

        if self.known.lock().await.get(&path).is_some() {
            return Ok(PersistedImage {
                hash,
                path,
                written: false,
            });
        }

        let written = if tokio::fs::try_exists(&path).await? {
            false
        } else {
            write_new(&path, &image.to_jpeg()?).await?
        };

        if written {
            debug!(path = %path.display(), "Persisted image");
        }
        self.known.lock().await.put(path.clone(), ());

        Ok(PersistedImage {
            hash,
            path,
            written,
        })
    }
}

/// Write `bytes` to a file that must not exist yet. Returns `false` if it does.
async fn write_new(path: &Path, bytes: &[u8]) -> LogResult<bool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::attachment::tests::{png_bytes, solid};

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_identical_uploads_persist_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());
        let now = Local::now();
        let image = solid(12, 12, [1, 2, 3]);
        let same = ImageAttachment::decode(&png_bytes(12, 12, [1, 2, 3])).unwrap();

        let first = store.persist(&image, &now).await;
        let second = store.persist(&same, &now).await;

        assert!(matches!(&first, Ok(p) if p.written));
        assert!(matches!(&second, Ok(p) if !p.written));

        let day_dir = tmp
            .path()
            .join(IMAGE_DIR)
            .join(now.format("%Y-%m-%d").to_string());
        assert_eq!(count_files(&day_dir), 1);
    }

    #[tokio::test]
    async fn test_existing_file_is_not_rewritten_by_fresh_store() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Local::now();
        let image = solid(5, 7, [0, 0, 0]);

        let first = ImageStore::new(tmp.path()).persist(&image, &now).await;
        let second = ImageStore::new(tmp.path()).persist(&image, &now).await;

        assert!(matches!(first, Ok(p) if p.written));
        assert!(matches!(second, Ok(p) if !p.written));
    }

    #[tokio::test]
    async fn test_different_content_gets_different_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());
        let now = Local::now();

        let a = store.persist(&solid(4, 4, [1, 0, 0]), &now).await;
        let b = store.persist(&solid(4, 4, [0, 1, 0]), &now).await;

        match (a, b) {
            (Ok(a), Ok(b)) => {
                assert_ne!(a.path, b.path);
                assert!(a.written && b.written);
            }
            _ => panic!("persist failed"),
        }
    }

    #[tokio::test]
    async fn test_png_upload_is_written_as_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path());
        let upload = png_bytes(48, 32, [10, 200, 30]);
        let image = ImageAttachment::decode(&upload).unwrap();

        let persisted = store.persist(&image, &Local::now()).await.unwrap();

        assert!(persisted.path.extension().is_some_and(|ext| ext == "jpg"));
        let written = std::fs::read(&persisted.path).unwrap();
        assert_eq!(&written[..2], &[0xFF, 0xD8]);
        assert_ne!(&written[..4], &upload[..4]);
        let decoded = image::load_from_memory(&written).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (48, 32));
    }
}
