//! Model formats and the resolved unit of work.

use serde::{Deserialize, Serialize};

use quantbench_state::run_key;

/// Quant assigned to runs served from an unquantized safetensors checkpoint.
pub const SAFETENSORS_QUANT: &str = "bf16";

/// Source format a model is pulled in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Safetensors,
    Gguf,
    Ollama,
}

impl ModelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ModelFormat::Safetensors => "safetensors",
            ModelFormat::Gguf => "gguf",
            ModelFormat::Ollama => "ollama",
        }
    }

    /// Parse a config-level format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safetensors" => Some(ModelFormat::Safetensors),
            "gguf" => Some(ModelFormat::Gguf),
            "ollama" => Some(ModelFormat::Ollama),
            _ => None,
        }
    }

    /// Whether variants must be enumerated through a registry query.
    pub fn requires_discovery(&self) -> bool {
        !matches!(self, ModelFormat::Safetensors)
    }
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the storage collaborator needs to fetch one model variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model_name: String,
    pub format: ModelFormat,
    /// Repo id (safetensors/GGUF) or tag (Ollama).
    pub source_ref: String,
    pub quant: String,
}

impl ModelRef {
    /// Registry reference to pull, e.g. `org/repo` or `llama3:8b-q4_K_M`.
    ///
    /// An Ollama reference that already pins a tag is pulled as written.
    pub fn pull_ref(&self) -> String {
        match self.format {
            ModelFormat::Ollama if !self.source_ref.contains(':') => {
                format!("{}:{}", self.source_ref, self.quant)
            }
            _ => self.source_ref.clone(),
        }
    }
}

/// One concrete (model, engine, quant) combination.
///
/// An empty `quant` marks an unresolved placeholder awaiting discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub model_name: String,
    pub engine_name: String,
    pub quant: String,
    pub suite: String,
    pub engine_config: serde_json::Map<String, serde_json::Value>,
    pub estimated_size_gb: f64,
    pub format: ModelFormat,
    pub source_ref: String,
}

impl RunSpec {
    /// Unique identity within a campaign: `model|engine|quant`.
    pub fn key(&self) -> String {
        run_key(&self.model_name, &self.engine_name, &self.quant)
    }

    pub fn is_resolved(&self) -> bool {
        !self.quant.is_empty()
    }

    /// Copy of this placeholder with `quant` filled in.
    pub fn resolve(&self, quant: &str) -> Self {
        Self {
            quant: quant.to_string(),
            ..self.clone()
        }
    }

    pub fn model_ref(&self) -> ModelRef {
        ModelRef {
            model_name: self.model_name.clone(),
            format: self.format,
            source_ref: self.source_ref.clone(),
            quant: self.quant.clone(),
        }
    }
}
