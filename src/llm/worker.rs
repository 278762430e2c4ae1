//! Model worker contract: request/response types and the streaming trait.

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on `max_new_tokens` accepted by the worker.
pub const MAX_NEW_TOKENS_CAP: u32 = 2048;

/// Boxed future type for worker operations.
pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lazy sequence of decode updates produced by a worker.
pub type DecodeStream = BoxStream<'static, WorkerResult<DecodeUpdate>>;

/// Errors raised while talking to a model worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// HTTP transport failure.
    #[error("worker transport error: {0}")]
    Http(#[from] reqwest::Error),
    /// Worker answered with a non-success status.
    #[error("worker returned http status {0}")]
    HttpStatus(u16),
    /// A streamed chunk was not a valid decode update.
    #[error("malformed worker chunk: {0}")]
    Decode(#[from] serde_json::Error),
    /// Worker address could not be parsed.
    #[error("invalid worker url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Worker is not able to serve requests.
    #[error("worker unavailable: {0}")]
    Unavailable(String),
}

/// Convenience result alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Generation request sent to the worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Fully rendered prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Token budget, capped at [`MAX_NEW_TOKENS_CAP`].
    pub max_new_tokens: u32,
    /// Stop sequence.
    pub stop: String,
    /// Base64-encoded images, in turn order.
    pub images: Vec<String>,
}

/// Partial decoding result. `text` is cumulative and includes the prompt on success.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecodeUpdate {
    /// Cumulative decoded text, or an error description.
    #[serde(default)]
    pub text: String,
    /// Zero on success.
    pub error_code: i32,
}

impl DecodeUpdate {
    /// Successful update carrying cumulative text.
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error_code: 0,
        }
    }

    /// Failed update.
    #[must_use]
    pub fn error(text: impl Into<String>, error_code: i32) -> Self {
        Self {
            text: text.into(),
            error_code,
        }
    }

    /// Whether this update reports success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

/// Worker status report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Models served by the worker.
    #[serde(default)]
    pub model_names: Vec<String>,
    /// Relative speed hint.
    #[serde(default)]
    pub speed: f64,
    /// Requests waiting in the worker queue.
    #[serde(default)]
    pub queue_length: u32,
}

/// A model worker that streams decode updates for a prompt.
pub trait ModelWorker: Send + Sync {
    /// Start a streaming generation.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be reached before streaming starts.
    fn generate_stream(&self, request: GenerateRequest)
    -> WorkerFuture<'_, WorkerResult<DecodeStream>>;

    /// Query the worker status.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be reached.
    fn status(&self) -> WorkerFuture<'_, WorkerResult<WorkerStatus>>;
}

/// Splits a byte stream into NUL-delimited JSON decode updates.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
}

impl ChunkDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every complete update they finish.
    ///
    /// Empty segments are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<DecodeUpdate, serde_json::Error>> {
        self.buffer.extend_from_slice(bytes);
        let mut updates = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == 0) {
            let segment: Vec<u8> = self.buffer.drain(..=pos).collect();
            let segment = &segment[..segment.len() - 1];
            if segment.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            updates.push(serde_json::from_slice(segment));
        }

        updates
    }

    /// Flush whatever trails the last delimiter.
    pub fn finish(&mut self) -> Option<Result<DecodeUpdate, serde_json::Error>> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(serde_json::from_slice(&rest))
    }
}
