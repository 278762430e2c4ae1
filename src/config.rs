//! Launcher configuration: command-line flags with environment fallbacks.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::llm::{ModelSource, ModelSpec, ModelVersion, Quantization};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid or conflicting values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Malformed host address.
    #[error("invalid host address: {0}")]
    Host(#[from] std::net::AddrParseError),
    /// Malformed worker URL.
    #[error("invalid worker url: {0}")]
    Url(#[from] url::ParseError),
}

/// How often the worker's model list is refreshed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelListMode {
    /// Probe once at startup.
    #[default]
    Once,
    /// Probe again on every page load.
    Reload,
}

/// Command-line flags of the `docowl-web` server.
#[derive(Clone, Debug, Parser)]
#[command(name = "docowl-web", version, about = "Web chat demo for DocOwl document understanding")]
pub struct Args {
    /// Address to bind.
    #[arg(long, env = "DOCOWL_HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on.
    #[arg(long, env = "DOCOWL_PORT", default_value_t = 7860)]
    pub port: u16,
    /// Maximum number of generations streaming at once.
    #[arg(long, env = "DOCOWL_CONCURRENCY", default_value_t = 10)]
    pub concurrency_count: usize,
    /// When to query the worker for its model list.
    #[arg(long, value_enum, default_value_t = ModelListMode::Once)]
    pub model_list_mode: ModelListMode,
    /// Where the model weights come from.
    #[arg(long, value_enum, default_value_t = ModelSource::Modelscope)]
    pub model_source: ModelSource,
    /// Checkpoint version.
    #[arg(long, value_enum, default_value_t = ModelVersion::Omni)]
    pub model_version: ModelVersion,
    /// Model path, used as-is for the `local` source.
    #[arg(long, env = "DOCOWL_MODEL_PATH", default_value = "iic/DocOwl1___5-Omni")]
    pub model_path: String,
    /// Device the worker runs the model on.
    #[arg(long, default_value = "cuda")]
    pub device: String,
    /// Load 8-bit weights.
    #[arg(long)]
    pub load_8bit: bool,
    /// Load 4-bit weights.
    #[arg(long)]
    pub load_4bit: bool,
    /// Enable input moderation.
    #[arg(long)]
    pub moderate: bool,
    /// Hide the title and terms of use.
    #[arg(long)]
    pub embed: bool,
    /// Base URL of the model worker.
    #[arg(long, env = "DOCOWL_WORKER_URL", default_value = "http://127.0.0.1:40000")]
    pub worker_url: String,
    /// Directory for conversation logs and persisted images.
    #[arg(long, env = "DOCOWL_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
    /// Directory holding the browser UI.
    #[arg(long, env = "DOCOWL_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
    /// Pause between streamed updates, in milliseconds.
    #[arg(long, default_value_t = 30)]
    pub stream_delay_ms: u64,
    /// Idle sessions are dropped after this many seconds.
    #[arg(long, default_value_t = 3600)]
    pub session_ttl_secs: u64,
    /// OpenAI key for the moderation endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
    /// Blocklist file used for moderation when no OpenAI key is set.
    #[arg(long, env = "DOCOWL_MODERATION_BLOCKLIST")]
    pub moderation_blocklist: Option<PathBuf>,
}

/// Moderation backend selected at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModerationBackend {
    /// Moderation disabled.
    Disabled,
    /// OpenAI moderation endpoint.
    OpenAi {
        /// API key.
        api_key: String,
    },
    /// Local blocklist file.
    Blocklist {
        /// Path of the term list.
        path: PathBuf,
    },
}

impl ModerationBackend {
    /// Short backend name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::OpenAi { .. } => "openai",
            Self::Blocklist { .. } => "blocklist",
        }
    }
}

/// Validated server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub addr: SocketAddr,
    /// Maximum concurrent generations.
    pub concurrency_count: usize,
    /// Model list refresh policy.
    pub model_list_mode: ModelListMode,
    /// Resolved model.
    pub model: ModelSpec,
    /// Moderation backend.
    pub moderation: ModerationBackend,
    /// Embed mode hides the page chrome.
    pub embed: bool,
    /// Model worker address.
    pub worker_url: Url,
    /// Log directory.
    pub log_dir: PathBuf,
    /// Static UI directory.
    pub static_dir: PathBuf,
    /// Pause between streamed updates.
    pub stream_delay: Duration,
    /// Idle session lifetime.
    pub session_ttl: Duration,
}

impl Args {
    /// Convert flags into a validated configuration.
    ///
    /// # Errors
    /// Returns an error if values are malformed or conflicting.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self.host.parse()?;

        let quantization = match (self.load_8bit, self.load_4bit) {
            (true, true) => {
                return Err(ConfigError::Invalid(
                    "--load-8bit and --load-4bit are mutually exclusive".to_string(),
                ));
            }
            (true, false) => Quantization::Int8,
            (false, true) => Quantization::Int4,
            (false, false) => Quantization::None,
        };

        let moderation = if !self.moderate {
            ModerationBackend::Disabled
        } else if let Some(api_key) = self.openai_api_key.filter(|k| !k.trim().is_empty()) {
            ModerationBackend::OpenAi { api_key }
        } else if let Some(path) = self.moderation_blocklist {
            ModerationBackend::Blocklist { path }
        } else {
            return Err(ConfigError::Invalid(
                "--moderate requires OPENAI_API_KEY or --moderation-blocklist".to_string(),
            ));
        };

        let config = ServerConfig {
            addr: SocketAddr::new(host, self.port),
            concurrency_count: self.concurrency_count,
            model_list_mode: self.model_list_mode,
            model: ModelSpec::resolve(
                self.model_source,
                self.model_version,
                &self.model_path,
                &self.device,
                quantization,
            ),
            moderation,
            embed: self.embed,
            worker_url: Url::parse(&self.worker_url)?,
            log_dir: self.log_dir,
            static_dir: self.static_dir,
            stream_delay: Duration::from_millis(self.stream_delay_ms),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

impl ServerConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_count == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_count must be > 0".to_string(),
            ));
        }

        if self.session_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "session_ttl_secs must be > 0".to_string(),
            ));
        }

        if !matches!(self.worker_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "worker url must be http(s), got {}",
                self.worker_url.scheme()
            )));
        }

        if self.model.path.trim().is_empty() {
            return Err(ConfigError::Invalid("model path must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ServerConfig, String> {
        let mut argv = vec!["docowl-web"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv)
            .map_err(|e| e.to_string())?
            .into_config()
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--worker-url", "http://127.0.0.1:40000"]).unwrap();
        assert_eq!(config.addr.port(), 7860);
        assert_eq!(config.concurrency_count, 10);
        assert_eq!(config.model.path, "iic/DocOwl1___5-Omni");
        assert_eq!(config.model.quantization, Quantization::None);
        assert_eq!(config.stream_delay, Duration::from_millis(30));
        assert!(!config.embed);
    }

    #[test]
    fn test_huggingface_source_and_quantization() {
        let config = parse(&[
            "--model-source",
            "huggingface",
            "--model-version",
            "Chat",
            "--load-4bit",
            "--embed",
        ])
        .unwrap();
        assert_eq!(config.model.path, "mPLUG/DocOwl1.5-Chat");
        assert_eq!(config.model.quantization, Quantization::Int4);
        assert!(config.embed);
    }

    #[test]
    fn test_conflicting_quantization_is_rejected() {
        let err = parse(&["--load-8bit", "--load-4bit"]);
        assert!(err.is_err_and(|e| e.contains("mutually exclusive")));
    }

    #[test]
    fn test_moderation_requires_backend() {
        let err = parse(&["--moderate", "--openai-api-key", " "]);
        assert!(err.is_err_and(|e| e.contains("--moderate requires")));

        let config = parse(&[
            "--moderate",
            "--openai-api-key",
            " ",
            "--moderation-blocklist",
            "terms.txt",
        ])
        .unwrap();
        assert_eq!(
            config.moderation,
            ModerationBackend::Blocklist {
                path: PathBuf::from("terms.txt")
            }
        );
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = parse(&["--concurrency-count", "0"]);
        assert!(err.is_err_and(|e| e.contains("concurrency_count")));
    }

    #[test]
    fn test_non_http_worker_is_rejected() {
        let err = parse(&["--worker-url", "ftp://worker"]);
        assert!(err.is_err());
    }
}
