//! TOML configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration
//! that runs fully offline: hash embeddings, extractive answers only, data
//! under `./data`.
//!
//! ```toml
//! [data]
//! dir = "./data/vectors"
//!
//! [chunking]
//! unit = "chars"      # or "words"
//! max_size = 512
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [[generation.backends]]
//! kind = "ollama"
//! model = "llama3.2"
//!
//! [watch]
//! dir = "./data/logs"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkUnit;
use crate::index::Metric;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/vectors")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub unit: ChunkUnit,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            unit: ChunkUnit::default(),
            max_size: default_max_size(),
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_max_size() -> usize {
    512
}
fn default_max_chunks() -> usize {
    2000
}

/// What to do when `index.bin` cannot be read back.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorruptIndexPolicy {
    /// Refuse to open the store.
    #[default]
    Fail,
    /// Move the damaged files aside and start from an empty store.
    Recreate,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub on_corrupt: CorruptIndexPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
        }
    }
}

fn default_k() -> usize {
    6
}
fn default_max_k() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Remote backends, tried in order before the extractive fallback.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            max_snippets: default_max_snippets(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_max_snippets() -> usize {
    6
}
fn default_snippet_chars() -> usize {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub kind: String,
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_watch_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_suffixes")]
    pub suffixes: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub ingest_existing: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_watch_dir(),
            suffixes: default_suffixes(),
            recursive: true,
            ingest_existing: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_watch_dir() -> PathBuf {
    PathBuf::from("./data/logs")
}
fn default_suffixes() -> Vec<String> {
    vec![".txt".to_string(), ".log".to_string()]
}
fn default_debounce_ms() -> u64 {
    250
}

impl WatchConfig {
    /// Whether `path` ends with one of the allowlisted suffixes.
    pub fn accepts(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy(),
            None => return false,
        };
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:6969".to_string()
}

impl Config {
    pub fn index_path(&self) -> PathBuf {
        self.data.dir.join("index.bin")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data.dir.join("metadata.sqlite")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_size == 0 {
        bail!("chunking.max_size must be > 0");
    }
    if config.chunking.max_chunks == 0 {
        bail!("chunking.max_chunks must be > 0");
    }

    if config.retrieval.default_k == 0 {
        bail!("retrieval.default_k must be >= 1");
    }
    if config.retrieval.max_k < config.retrieval.default_k {
        bail!("retrieval.max_k must be >= retrieval.default_k");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" | "local" | "ollama" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }

    for backend in &config.generation.backends {
        match backend.kind.as_str() {
            "ollama" | "openai" => {}
            other => bail!(
                "Unknown generation backend kind: '{}'. Must be ollama or openai.",
                other
            ),
        }
        if backend.timeout_secs == 0 {
            bail!(
                "generation.backends timeout_secs must be > 0 (backend '{}')",
                backend.model
            );
        }
    }

    if config.watch.suffixes.iter().any(|s| s.is_empty()) {
        bail!("watch.suffixes must not contain empty strings");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.unit, ChunkUnit::Chars);
        assert_eq!(config.chunking.max_size, 512);
        assert_eq!(config.chunking.max_chunks, 2000);
        assert_eq!(config.index.metric, Metric::L2);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.retrieval.default_k, 6);
        assert!(config.generation.backends.is_empty());
        assert_eq!(config.server.bind, "0.0.0.0:6969");
        assert_eq!(config.watch.suffixes, vec![".txt", ".log"]);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/logcopilot.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.generation.backends.len(), 1);
        assert_eq!(config.generation.backends[0].model, "llama3.2");
    }

    #[test]
    fn test_backends_keep_order() {
        let config: Config = toml::from_str(
            r#"
[[generation.backends]]
kind = "ollama"
model = "llama3.2"

[[generation.backends]]
kind = "openai"
model = "gpt-4o-mini"
timeout_secs = 10
"#,
        )
        .unwrap();
        validate(&config).unwrap();
        let kinds: Vec<&str> = config
            .generation
            .backends
            .iter()
            .map(|b| b.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["ollama", "openai"]);
        assert_eq!(config.generation.backends[0].timeout_secs, 120);
        assert_eq!(config.generation.backends[1].timeout_secs, 10);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let config: Config = toml::from_str("[chunking]\nmax_size = 0").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let config: Config = toml::from_str("[embedding]\ntimeout_secs = 0").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));

        let config: Config = toml::from_str(
            "[[generation.backends]]\nkind = \"ollama\"\nmodel = \"llama3.2\"\ntimeout_secs = 0",
        )
        .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let parsed: Result<Config, _> = toml::from_str("[index]\nmetric = \"hamming\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_words_unit_and_recreate_policy() {
        let config: Config = toml::from_str(
            "[chunking]\nunit = \"words\"\n\n[index]\nmetric = \"cosine\"\non_corrupt = \"recreate\"",
        )
        .unwrap();
        assert_eq!(config.chunking.unit, ChunkUnit::Words);
        assert_eq!(config.index.metric, Metric::Cosine);
        assert_eq!(config.index.on_corrupt, CorruptIndexPolicy::Recreate);
    }

    #[test]
    fn test_suffix_allowlist() {
        let watch = WatchConfig::default();
        assert!(watch.accepts(Path::new("/var/log/app.log")));
        assert!(watch.accepts(Path::new("notes.txt")));
        assert!(!watch.accepts(Path::new("image.png")));
        assert!(!watch.accepts(Path::new("app.log.gz")));
    }
}
