//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `ATELIER_DATA_DIR`, `ATELIER_OUTPUT_DIR` and
//! `ATELIER_LOG_LEVEL` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// OpenAI / OpenAI-compatible enrichment provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Enrichment (LLM) configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"` or `"openai"`).
    /// Maps to `default` in `[llm]` TOML — named `default` there to signal
    /// that other provider sections can coexist without being loaded.
    pub provider: String,
    /// Config for the OpenAI / OpenAI-compatible provider (`[llm.openai]`).
    pub openai: OpenAiConfig,
}

/// Embedding backend configuration (`[embedding]`).
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"` (offline, deterministic) or `"openai"` (remote endpoint).
    pub provider: String,
    /// Embeddings endpoint URL, used by the `"openai"` provider.
    pub api_base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Vector width for the hash embedder.
    pub dimension: usize,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Remote generation service configuration (`[generation]`).
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Capability id of the text-to-image service.
    pub text_to_image_app: String,
    /// Capability id of the image-to-3D service.
    pub image_to_3d_app: String,
    /// Domain suffix appended to bare capability ids (those without a dot).
    pub network_suffix: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Memory subsystem configuration (`[memory]`).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Whether the substring search fallback also matches stored tags.
    pub fallback_matches_tags: bool,
}

/// Fully-resolved pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent state (`memory.json`, `index.json`).
    /// Already expanded — no `~`.
    pub data_dir: PathBuf,
    /// Directory where generated artifacts are written.
    pub output_dir: PathBuf,
    pub log_level: String,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var — `None` for keyless local models.
    /// Never sourced from TOML.
    pub llm_api_key: Option<String>,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub memory: MemoryConfig,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    pipeline: RawPipeline,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    embedding: RawEmbedding,
    #[serde(default)]
    generation: RawGeneration,
    #[serde(default)]
    memory: RawMemory,
}

#[derive(Deserialize)]
struct RawPipeline {
    data_dir: String,
    #[serde(default = "default_output_dir")]
    output_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(rename = "default", default = "default_embedding_provider")]
    provider: String,
    #[serde(default = "default_embedding_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_embedding_model")]
    model: String,
    #[serde(default = "default_embedding_dimension")]
    dimension: usize,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_base_url: default_embedding_api_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawGeneration {
    #[serde(default)]
    text_to_image_app: String,
    #[serde(default)]
    image_to_3d_app: String,
    #[serde(default = "default_network_suffix")]
    network_suffix: String,
    #[serde(default = "default_generation_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawGeneration {
    fn default() -> Self {
        Self {
            text_to_image_app: String::new(),
            image_to_3d_app: String::new(),
            network_suffix: default_network_suffix(),
            timeout_seconds: default_generation_timeout_seconds(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawMemory {
    #[serde(default)]
    fallback_matches_tags: bool,
}

fn default_output_dir() -> String { "output".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.7 }
fn default_timeout_seconds() -> u64 { 60 }
fn default_embedding_provider() -> String { "hash".to_string() }
fn default_embedding_api_base_url() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 256 }
fn default_network_suffix() -> String { "node3.openfabric.network".to_string() }
fn default_generation_timeout_seconds() -> u64 { 300 }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let data_dir_override = env::var("ATELIER_DATA_DIR").ok();
    let output_dir_override = env::var("ATELIER_OUTPUT_DIR").ok();
    let log_level_override = env::var("ATELIER_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        data_dir_override.as_deref(),
        output_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    output_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let p = parsed.pipeline;

    let data_dir = expand_home(data_dir_override.unwrap_or(&p.data_dir));
    let output_dir = expand_home(output_dir_override.unwrap_or(&p.output_dir));
    let log_level = log_level_override.unwrap_or(&p.log_level).to_string();

    Ok(Config {
        data_dir,
        output_dir,
        log_level,
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: env::var("LLM_API_KEY").ok(),
        embedding: EmbeddingConfig {
            provider: parsed.embedding.provider,
            api_base_url: parsed.embedding.api_base_url,
            model: parsed.embedding.model,
            dimension: parsed.embedding.dimension,
            timeout_seconds: parsed.embedding.timeout_seconds,
        },
        generation: GenerationConfig {
            text_to_image_app: parsed.generation.text_to_image_app,
            image_to_3d_app: parsed.generation.image_to_3d_app,
            network_suffix: parsed.generation.network_suffix,
            timeout_seconds: parsed.generation.timeout_seconds,
        },
        memory: MemoryConfig {
            fallback_matches_tags: parsed.memory.fallback_matches_tags,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    if path == "~" {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy providers, no API keys, no network.
#[cfg(test)]
impl Config {
    pub fn test_default(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            output_dir: data_dir.join("output"),
            log_level: "info".into(),
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            llm_api_key: None,
            embedding: EmbeddingConfig {
                provider: "hash".into(),
                api_base_url: "http://localhost:0/v1/embeddings".into(),
                model: "test-embed".into(),
                dimension: 64,
                timeout_seconds: 1,
            },
            generation: GenerationConfig {
                text_to_image_app: "text-to-image-test".into(),
                image_to_3d_app: "image-to-3d-test".into(),
                network_suffix: "test.invalid".into(),
                timeout_seconds: 1,
            },
            memory: MemoryConfig {
                fallback_matches_tags: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[pipeline]
data_dir = "datastore"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None, None).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("datastore"));
        assert_eq!(cfg.output_dir, PathBuf::from("output"));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.llm.provider, "dummy");
        assert_eq!(cfg.embedding.provider, "hash");
        assert!(!cfg.memory.fallback_matches_tags);
    }

    #[test]
    fn full_sections_parse() {
        let f = write_toml(
            r#"
[pipeline]
data_dir = "d"
output_dir = "o"
log_level = "debug"

[llm]
default = "openai"

[llm.openai]
model = "gpt-test"

[embedding]
default = "openai"
dimension = 128

[generation]
text_to_image_app = "img-app"
image_to_3d_app = "model-app"
network_suffix = "example.net"

[memory]
fallback_matches_tags = true
"#,
        );
        let cfg = load_from(f.path(), None, None, None).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "gpt-test");
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.embedding.dimension, 128);
        assert_eq!(cfg.generation.text_to_image_app, "img-app");
        assert_eq!(cfg.generation.network_suffix, "example.net");
        assert!(cfg.memory.fallback_matches_tags);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Ok(home) = std::env::var("HOME") {
            let expanded = expand_home("~/.atelier");
            assert!(expanded.starts_with(&home));
            assert!(expanded.ends_with(".atelier"));
        }
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn data_dir_override_wins() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), None, None).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/test-override"));
    }

    #[test]
    fn log_level_override_wins() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None, Some("trace")).unwrap();
        assert_eq!(cfg.log_level, "trace");
    }
}
