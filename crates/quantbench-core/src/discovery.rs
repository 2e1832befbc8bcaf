//! Registry-backed variant discovery
//!
//! Queries the Hugging Face model API for GGUF files and the Ollama
//! registry for tags, turning either into a list of variant names.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::collaborators::Discovery;
use crate::run_spec::ModelFormat;

/// Registry endpoints
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Hugging Face API base URL
    pub hf_endpoint: String,
    /// Ollama registry base URL
    pub ollama_registry: String,
    /// Token for gated Hugging Face repos
    pub hf_token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            hf_endpoint: std::env::var("HF_ENDPOINT")
                .unwrap_or_else(|_| "https://huggingface.co".to_string()),
            ollama_registry: std::env::var("OLLAMA_REGISTRY")
                .unwrap_or_else(|_| "https://registry.ollama.ai".to_string()),
            hf_token: std::env::var("HF_TOKEN").ok(),
        }
    }
}

impl RegistryConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize)]
struct HfModelInfo {
    #[serde(default)]
    siblings: Vec<HfSibling>,
}

#[derive(Debug, Deserialize)]
struct HfSibling {
    rfilename: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagList {
    #[serde(default)]
    tags: Vec<String>,
}

/// Production `Discovery` over HTTP
pub struct RegistryDiscovery {
    config: RegistryConfig,
    http_client: reqwest::Client,
}

impl RegistryDiscovery {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("quantbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn discover_gguf_quants(&self, repo: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/api/models/{}",
            self.config.hf_endpoint.trim_end_matches('/'),
            repo
        );
        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.config.hf_token {
            request = request.bearer_auth(token);
        }
        let info: HfModelInfo = request
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await
            .with_context(|| format!("decoding model info for {repo}"))?;

        let files: Vec<&str> = info.siblings.iter().map(|s| s.rfilename.as_str()).collect();
        let quants = gguf_quants_from_files(&files);
        debug!(repo = %repo, files = files.len(), quants = quants.len(), "GGUF discovery");
        Ok(quants)
    }

    async fn discover_ollama_tags(&self, reference: &str) -> Result<Vec<String>> {
        if let Some((_, tag)) = reference.split_once(':') {
            return Ok(vec![tag.to_string()]);
        }
        let (namespace, name) = reference.split_once('/').unwrap_or(("library", reference));
        let url = format!(
            "{}/v2/{}/{}/tags/list",
            self.config.ollama_registry.trim_end_matches('/'),
            namespace,
            name
        );
        let list: OllamaTagList = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await
            .with_context(|| format!("decoding tag list for {reference}"))?;

        let tags: BTreeSet<String> = list.tags.into_iter().collect();
        Ok(tags.into_iter().collect())
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn discover(&self, format: ModelFormat, reference: &str) -> Result<Vec<String>> {
        match format {
            ModelFormat::Gguf => self.discover_gguf_quants(reference).await,
            ModelFormat::Ollama => self.discover_ollama_tags(reference).await,
            ModelFormat::Safetensors => anyhow::bail!(
                "safetensors checkpoints have a fixed variant; nothing to discover for {reference}"
            ),
        }
    }
}

fn quant_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(I?Q[0-9](_[A-Z0-9]+)*|F16|F32|BF16)$").expect("static regex")
    })
}

fn shard_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-[0-9]{5}-of-[0-9]{5}$").expect("static regex"))
}

/// Extract the quant type from a GGUF filename, e.g.
/// `Meta-Llama-3-8B-Instruct.Q4_K_M.gguf` -> `Q4_K_M`.
pub fn parse_gguf_quant(filename: &str) -> Option<String> {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    if base.to_ascii_lowercase().starts_with("mmproj") {
        return None;
    }
    let (stem, extension) = base.rsplit_once('.')?;
    if !extension.eq_ignore_ascii_case("gguf") {
        return None;
    }
    let stem = shard_suffix().replace(stem, "");

    stem.split(['-', '.'])
        .rev()
        .find(|token| quant_pattern().is_match(token))
        .map(|token| token.to_ascii_uppercase())
}

/// Distinct quant types across a repo's file list, sorted.
pub fn gguf_quants_from_files(files: &[&str]) -> Vec<String> {
    let quants: BTreeSet<String> = files.iter().filter_map(|f| parse_gguf_quant(f)).collect();
    quants.into_iter().collect()
}
