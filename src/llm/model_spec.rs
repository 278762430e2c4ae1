//! Model selection: where the DocOwl weights come from and how they are loaded.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Where the model weights are fetched from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Use `model_path` as given.
    Local,
    /// `ModelScope` hub.
    Modelscope,
    /// Hugging Face hub.
    Huggingface,
}

/// Released DocOwl 1.5 checkpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
pub enum ModelVersion {
    /// Structure-learning stage checkpoint.
    #[value(name = "stage1")]
    #[serde(rename = "stage1")]
    Stage1,
    /// Instruction-tuned chat checkpoint.
    #[value(name = "Chat")]
    Chat,
    /// Omni checkpoint.
    #[value(name = "Omni")]
    Omni,
}

impl ModelVersion {
    /// Name used in hub repository ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stage1 => "stage1",
            Self::Chat => "Chat",
            Self::Omni => "Omni",
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Weight quantization requested from the worker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    /// Full precision.
    #[default]
    None,
    /// 8-bit weights.
    Int8,
    /// 4-bit weights.
    Int4,
}

/// Resolved model description, logged at startup and checked against the worker.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Weight source.
    pub source: ModelSource,
    /// Checkpoint version.
    pub version: ModelVersion,
    /// Repository id or local path.
    pub path: String,
    /// Target device, e.g. `cuda`.
    pub device: String,
    /// Quantization mode.
    pub quantization: Quantization,
}

impl ModelSpec {
    /// Resolve the model path for the given source.
    ///
    /// Hub sources ignore `model_path` and derive the repository id from the version.
    #[must_use]
    pub fn resolve(
        source: ModelSource,
        version: ModelVersion,
        model_path: &str,
        device: &str,
        quantization: Quantization,
    ) -> Self {
        let path = match source {
            ModelSource::Local => model_path.to_string(),
            ModelSource::Modelscope => format!("iic/DocOwl1___5-{version}"),
            ModelSource::Huggingface => format!("mPLUG/DocOwl1.5-{version}"),
        };

        Self {
            source,
            version,
            path,
            device: device.to_string(),
            quantization,
        }
    }

    /// Short model name: the last path component.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }

    /// Whether a worker-reported model name refers to this model.
    #[must_use]
    pub fn matches(&self, reported: &str) -> bool {
        let reported = reported.trim_end_matches('/');
        reported == self.path || reported.rsplit('/').next() == Some(self.model_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_sources_derive_repository_ids() {
        let ms = ModelSpec::resolve(
            ModelSource::Modelscope,
            ModelVersion::Omni,
            "ignored",
            "cuda",
            Quantization::None,
        );
        assert_eq!(ms.path, "iic/DocOwl1___5-Omni");
        assert_eq!(ms.model_name(), "DocOwl1___5-Omni");

        let hf = ModelSpec::resolve(
            ModelSource::Huggingface,
            ModelVersion::Chat,
            "ignored",
            "cuda",
            Quantization::Int8,
        );
        assert_eq!(hf.path, "mPLUG/DocOwl1.5-Chat");
    }

    #[test]
    fn test_local_source_keeps_path() {
        let spec = ModelSpec::resolve(
            ModelSource::Local,
            ModelVersion::Stage1,
            "/models/docowl/",
            "cpu",
            Quantization::Int4,
        );
        assert_eq!(spec.path, "/models/docowl/");
        assert_eq!(spec.model_name(), "docowl");
        assert!(spec.matches("/srv/other/docowl"));
        assert!(!spec.matches("llava-v1.5"));
    }
}
