//! OpenAI moderation endpoint client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ModerationError, ModerationFuture, Moderator};

const MODERATION_URL: &str = "https://api.openai.com/v1/moderations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    #[serde(default)]
    flagged: bool,
}

/// Moderator backed by the OpenAI moderation API.
pub struct OpenAiModerator {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiModerator {
    /// Create a moderator using `api_key`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ModerationError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: MODERATION_URL.to_string(),
        })
    }

    /// Override the endpoint (useful for proxies).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn check(&self, text: &str) -> Result<bool, reqwest::Error> {
        let response: ModerationResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&ModerationRequest { input: text })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.results.iter().any(|r| r.flagged))
    }
}

impl Moderator for OpenAiModerator {
    fn violates<'a>(&'a self, text: &'a str) -> ModerationFuture<'a, bool> {
        Box::pin(async move {
            match self.check(text).await {
                Ok(flagged) => flagged,
                Err(err) => {
                    warn!(?err, "Moderation request failed, treating input as clean");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_flagged_if_any_result_flagged() {
        let body = r#"{"id":"x","results":[{"flagged":false},{"flagged":true}]}"#;
        let parsed: ModerationResponse =
            serde_json::from_str(body).unwrap_or(ModerationResponse { results: vec![] });
        assert!(parsed.results.iter().any(|r| r.flagged));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_flagged() {
        let moderator = OpenAiModerator::new("test-key").unwrap();
        let moderator = moderator.with_endpoint("http://127.0.0.1:9/v1/moderations");
        assert!(!moderator.violates("hello").await);
    }
}
