//! HTTP client for a remote DocOwl model worker.
//!
//! Behaviour:
//! - `POST /worker_generate_stream` returns NUL-delimited JSON decode updates.
//! - `POST /worker_get_status` reports the served model names.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use url::Url;

use super::worker::{
    ChunkDecoder, DecodeStream, GenerateRequest, ModelWorker, WorkerError, WorkerFuture,
    WorkerResult, WorkerStatus,
};

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Total timeout for a single generation.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for status probes.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("docowl-web/", env!("CARGO_PKG_VERSION"));

/// Model worker reached over HTTP.
pub struct HttpModelWorker {
    client: Client,
    base_url: Url,
}

impl HttpModelWorker {
    /// Create a client for the worker at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> WorkerResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(GENERATION_TIMEOUT)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Worker base address.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> WorkerResult<Url> {
        Ok(self.base_url.join(path)?)
    }
}

impl ModelWorker for HttpModelWorker {
    fn generate_stream(
        &self,
        request: GenerateRequest,
    ) -> WorkerFuture<'_, WorkerResult<DecodeStream>> {
        Box::pin(async move {
            let url = self.endpoint("worker_generate_stream")?;
            let response = self.client.post(url).json(&request).send().await?;
            if !response.status().is_success() {
                return Err(WorkerError::HttpStatus(response.status().as_u16()));
            }

            let mut body = response.bytes_stream().boxed();
            let stream = async_stream::stream! {
                let mut decoder = ChunkDecoder::new();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for update in decoder.push(&bytes) {
                                yield update.map_err(WorkerError::from);
                            }
                        }
                        Err(err) => {
                            yield Err(WorkerError::Http(err));
                            return;
                        }
                    }
                }
                if let Some(update) = decoder.finish() {
                    yield update.map_err(WorkerError::from);
                }
            };

            Ok(stream.boxed())
        })
    }

    fn status(&self) -> WorkerFuture<'_, WorkerResult<WorkerStatus>> {
        Box::pin(async move {
            let url = self.endpoint("worker_get_status")?;
            let response = self
                .client
                .post(url)
                .timeout(STATUS_TIMEOUT)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(WorkerError::HttpStatus(response.status().as_u16()));
            }
            Ok(response.json::<WorkerStatus>().await?)
        })
    }
}
