//! Campaign configuration.
//!
//! The config is parsed and validated once at the boundary; everything
//! downstream works with the immutable, already-checked structs.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CampaignError, Result};
use crate::run_spec::ModelFormat;
use quantbench_state::KEY_SEPARATOR;

/// Default benchmark suite for engines that do not name one.
pub const DEFAULT_SUITE: &str = "standard";
/// Default free space (GB) that must remain after a run's download.
pub const DEFAULT_RESERVE_GB: f64 = 100.0;

/// A model to benchmark and the registries it can be pulled from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    /// Parameter count label, e.g. "8B". Informational only.
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default)]
    pub safetensors_repo: Option<String>,
    #[serde(default)]
    pub gguf_repo: Option<String>,
    #[serde(default)]
    pub ollama_tag: Option<String>,
    /// Approximate download size; 0 when unknown.
    #[serde(default)]
    pub estimated_size_gb: f64,
}

impl ModelSpec {
    /// Registry reference this model declares for `format`.
    pub fn source_for(&self, format: ModelFormat) -> Option<&str> {
        let source = match format {
            ModelFormat::Safetensors => self.safetensors_repo.as_deref(),
            ModelFormat::Gguf => self.gguf_repo.as_deref(),
            ModelFormat::Ollama => self.ollama_tag.as_deref(),
        };
        source.filter(|s| !s.trim().is_empty())
    }
}

/// An inference engine and the suite it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSpec {
    pub name: String,
    #[serde(default = "default_suite")]
    pub suite: String,
    /// Free-form options handed to the benchmark executor.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Restrict the model formats this engine consumes.
    #[serde(default)]
    pub formats: Option<Vec<String>>,
}

fn default_suite() -> String {
    DEFAULT_SUITE.to_string()
}

impl EngineSpec {
    /// Formats this engine accepts, explicit list first, otherwise inferred
    /// from the engine name.
    pub fn accepted_formats(&self) -> Vec<ModelFormat> {
        if let Some(formats) = &self.formats {
            let mut parsed: Vec<ModelFormat> =
                formats.iter().filter_map(|f| ModelFormat::parse(f)).collect();
            parsed.sort();
            parsed.dedup();
            return parsed;
        }
        vec![infer_format(&self.name)]
    }
}

fn infer_format(engine_name: &str) -> ModelFormat {
    let name = engine_name.to_ascii_lowercase();
    if name.contains("ollama") {
        ModelFormat::Ollama
    } else if ["llama_cpp", "llama.cpp", "llamacpp", "llama-cpp", "gguf"]
        .iter()
        .any(|needle| name.contains(needle))
    {
        ModelFormat::Gguf
    } else {
        ModelFormat::Safetensors
    }
}

/// Disk admission settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskConfig {
    #[serde(default = "default_reserve_gb")]
    pub reserve_gb: f64,
    #[serde(default)]
    pub cleanup_after_run: bool,
    /// Volume to measure; defaults to the working directory.
    #[serde(default)]
    pub storage_path: Option<String>,
}

fn default_reserve_gb() -> f64 {
    DEFAULT_RESERVE_GB
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            reserve_gb: DEFAULT_RESERVE_GB,
            cleanup_after_run: false,
            storage_path: None,
        }
    }
}

impl DiskConfig {
    pub fn storage_path(&self) -> &str {
        self.storage_path.as_deref().unwrap_or(".")
    }
}

/// Variant exclusion rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuantFilterConfig {
    /// Glob patterns (`*`, `?`) matched against variant names.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
}

/// Hard limits applied regardless of disk state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    /// Runs larger than this are skipped; 0 disables the limit.
    #[serde(default)]
    pub max_model_size_gb: f64,
}

/// A full campaign definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignConfig {
    pub campaign_name: String,
    pub models: Vec<ModelSpec>,
    pub engines: Vec<EngineSpec>,
    #[serde(default)]
    pub disk: DiskConfig,
    #[serde(default)]
    pub quant_filter: QuantFilterConfig,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Passed through to the notification layer untouched.
    #[serde(default)]
    pub notifications: serde_json::Value,
}

impl CampaignConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| CampaignError::Configuration(format!("malformed JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| CampaignError::Configuration(format!("malformed TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` or `.toml` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CampaignError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            other => Err(CampaignError::Configuration(format!(
                "unsupported config extension {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    /// Check structural invariants. Called by every loader.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CampaignError::Configuration(msg));

        if self.campaign_name.trim().is_empty() {
            return invalid("campaign_name cannot be empty".to_string());
        }
        if self.models.is_empty() {
            return invalid("at least one model is required".to_string());
        }
        if self.engines.is_empty() {
            return invalid("at least one engine is required".to_string());
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            check_name("model", &model.name)?;
            if !seen.insert(model.name.as_str()) {
                return invalid(format!("duplicate model name: {}", model.name));
            }
            if !model.estimated_size_gb.is_finite() || model.estimated_size_gb < 0.0 {
                return invalid(format!(
                    "model {}: estimated_size_gb must be a non-negative number",
                    model.name
                ));
            }
        }

        let mut seen = HashSet::new();
        for engine in &self.engines {
            check_name("engine", &engine.name)?;
            if !seen.insert(engine.name.as_str()) {
                return invalid(format!("duplicate engine name: {}", engine.name));
            }
            if engine.suite.trim().is_empty() {
                return invalid(format!("engine {}: suite cannot be empty", engine.name));
            }
            if let Some(formats) = &engine.formats {
                for format in formats {
                    if ModelFormat::parse(format).is_none() {
                        return invalid(format!(
                            "engine {}: unknown format {:?} (expected safetensors, gguf or ollama)",
                            engine.name, format
                        ));
                    }
                }
            }
        }

        if !self.disk.reserve_gb.is_finite() || self.disk.reserve_gb < 0.0 {
            return invalid("disk.reserve_gb must be a non-negative number".to_string());
        }
        let limit = self.resource_limits.max_model_size_gb;
        if !limit.is_finite() || limit < 0.0 {
            return invalid(
                "resource_limits.max_model_size_gb must be a non-negative number".to_string(),
            );
        }
        if self
            .quant_filter
            .skip_patterns
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return invalid("quant_filter.skip_patterns cannot contain empty patterns".to_string());
        }

        Ok(())
    }

    /// Stable id for persisted state: slug of the name plus a short digest.
    pub fn campaign_id(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.campaign_name.as_bytes()));
        let slug = slugify(&self.campaign_name);
        let slug = if slug.is_empty() { "campaign" } else { &slug };
        format!("{slug}-{}", &digest[..12])
    }
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CampaignError::Configuration(format!(
            "{kind} name cannot be empty"
        )));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(CampaignError::Configuration(format!(
            "{kind} name {name:?} cannot contain '{KEY_SEPARATOR}'"
        )));
    }
    Ok(())
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').chars().take(48).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "campaign_name": "Nightly Sweep",
        "models": [{"name": "M", "safetensors_repo": "org/m"}],
        "engines": [{"name": "vllm"}]
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config = CampaignConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.engines[0].suite, "standard");
        assert_eq!(config.disk.reserve_gb, 100.0);
        assert!(!config.disk.cleanup_after_run);
        assert_eq!(config.disk.storage_path(), ".");
        assert!(config.quant_filter.skip_patterns.is_empty());
        assert_eq!(config.resource_limits.max_model_size_gb, 0.0);
        assert_eq!(config.models[0].estimated_size_gb, 0.0);
    }

    #[test]
    fn test_toml_config() {
        let config = CampaignConfig::from_toml_str(
            r#"
campaign_name = "quant sweep"

[[models]]
name = "Qwen2.5-7B"
gguf_repo = "Qwen/Qwen2.5-7B-Instruct-GGUF"
estimated_size_gb = 5.5

[[engines]]
name = "llama_cpp"
suite = "quick"
config = { n_gpu_layers = 99 }

[disk]
reserve_gb = 50.0
cleanup_after_run = true

[quant_filter]
skip_patterns = ["IQ1_*"]

[notifications]
webhook = "https://hooks.example.com/bench"
"#,
        )
        .unwrap();
        assert_eq!(config.engines[0].config["n_gpu_layers"], 99);
        assert_eq!(config.disk.reserve_gb, 50.0);
        assert_eq!(config.quant_filter.skip_patterns, vec!["IQ1_*"]);
        assert_eq!(
            config.notifications["webhook"],
            "https://hooks.example.com/bench"
        );
    }

    #[test]
    fn test_rejects_malformed_documents() {
        let doc = |name: &str, models: &str, engines: &str, extra: &str| {
            format!(
                r#"{{"campaign_name": "{name}", "models": {models}, "engines": {engines}{extra}}}"#
            )
        };
        let one = r#"[{"name": "M"}]"#;
        let vllm = r#"[{"name": "vllm"}]"#;
        let cases = [
            doc("", one, vllm, ""),
            doc("c", "[]", vllm, ""),
            doc("c", one, "[]", ""),
            doc("c", r#"[{"name": "M"}, {"name": "M"}]"#, vllm, ""),
            doc("c", r#"[{"name": "a|b"}]"#, vllm, ""),
            doc("c", r#"[{"name": "M", "estimated_size_gb": -1}]"#, vllm, ""),
            doc("c", one, r#"[{"name": "x", "formats": ["onnx"]}]"#, ""),
            doc("c", one, vllm, r#", "disk": {"reserve_gb": -5}"#),
            doc("c", one, vllm, r#", "quant_filter": {"skip_patterns": [" "]}"#),
            doc("c", r#""not-a-list""#, "[]", ""),
        ];
        for case in &cases {
            match CampaignConfig::from_json_str(case) {
                Err(CampaignError::Configuration(_)) => {}
                other => panic!("expected Configuration error for {case}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_accepted_formats() {
        let engine = |name: &str, formats: Option<Vec<&str>>| EngineSpec {
            name: name.to_string(),
            suite: DEFAULT_SUITE.to_string(),
            config: Default::default(),
            formats: formats.map(|f| f.into_iter().map(String::from).collect()),
        };
        assert_eq!(engine("vllm", None).accepted_formats(), vec![ModelFormat::Safetensors]);
        assert_eq!(engine("llama_cpp", None).accepted_formats(), vec![ModelFormat::Gguf]);
        assert_eq!(engine("ollama", None).accepted_formats(), vec![ModelFormat::Ollama]);
        assert_eq!(
            engine("custom", Some(vec!["ollama", "gguf", "GGUF"])).accepted_formats(),
            vec![ModelFormat::Gguf, ModelFormat::Ollama]
        );
    }

    #[test]
    fn test_campaign_id_is_stable_and_safe() {
        let config = CampaignConfig::from_json_str(MINIMAL).unwrap();
        let id = config.campaign_id();
        assert_eq!(id, config.clone().campaign_id());
        assert!(id.starts_with("nightly-sweep-"));
        assert_eq!(id.len(), "nightly-sweep-".len() + 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("campaign.json");
        std::fs::write(&json, MINIMAL).unwrap();
        assert!(CampaignConfig::from_path(&json).is_ok());

        let yaml = dir.path().join("campaign.yaml");
        std::fs::write(&yaml, "campaign_name: x").unwrap();
        assert!(matches!(
            CampaignConfig::from_path(&yaml),
            Err(CampaignError::Configuration(_))
        ));
    }
}
