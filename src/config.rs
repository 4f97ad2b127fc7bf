use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ModelProfile;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub source: SourceConfig,
    /// Extra or overriding model profiles.
    #[serde(default)]
    pub models: Vec<ModelProfile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Maximum inputs per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum summed input tokens per embedding request.
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_batch_tokens: default_max_batch_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    512
}
fn default_max_batch_tokens() -> usize {
    8_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    /// Concurrent file reads against the source host.
    #[serde(default = "default_concurrency")]
    pub read_concurrency: usize,
    /// Concurrent record writes against the store.
    #[serde(default = "default_concurrency")]
    pub write_concurrency: usize,
    /// Files whose embedding input reaches this many cl100k tokens are left
    /// out of the index.
    #[serde(default = "default_max_file_tokens")]
    pub max_file_tokens: usize,
    /// Delete stored records whose path disappeared from the branch.
    #[serde(default = "default_prune_orphans")]
    pub prune_orphans: bool,
    /// Globs excluded in addition to the built-in rules.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            read_concurrency: default_concurrency(),
            write_concurrency: default_concurrency(),
            max_file_tokens: default_max_file_tokens(),
            prune_orphans: default_prune_orphans(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_max_file_tokens() -> usize {
    8_000
}
fn default_prune_orphans() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetrievalConfig {
    /// Drop weakly related files before the budget fit.
    #[serde(default)]
    pub dynamic_threshold: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `github` or `git`.
    #[serde(default = "default_source_kind")]
    pub kind: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Directory holding local checkouts as `<root>/<owner>/<repo>` (git kind).
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            api_url: default_api_url(),
            root: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_kind() -> String {
    "github".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// A config with every section at its defaults, storing to `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            embedding: EmbeddingConfig::default(),
            indexer: IndexerConfig::default(),
            retrieval: RetrievalConfig::default(),
            source: SourceConfig::default(),
            models: Vec::new(),
        }
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
    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_batch_tokens == 0 {
        anyhow::bail!("embedding.max_batch_tokens must be > 0");
    }

    // Validate indexer
    if config.indexer.read_concurrency == 0 || config.indexer.write_concurrency == 0 {
        anyhow::bail!("indexer.read_concurrency and indexer.write_concurrency must be >= 1");
    }
    if config.indexer.max_file_tokens == 0 {
        anyhow::bail!("indexer.max_file_tokens must be > 0");
    }
    if config.indexer.max_file_tokens > config.embedding.max_batch_tokens {
        anyhow::bail!(
            "indexer.max_file_tokens ({}) must not exceed embedding.max_batch_tokens ({})",
            config.indexer.max_file_tokens,
            config.embedding.max_batch_tokens
        );
    }

    // Validate source
    match config.source.kind.as_str() {
        "github" => {}
        "git" => {
            if config.source.root.is_none() {
                anyhow::bail!("source.root must be set when source.kind = 'git'");
            }
        }
        other => anyhow::bail!("Unknown source kind: '{}'. Must be github or git.", other),
    }

    // Validate model profiles
    for profile in &config.models {
        if profile.model.trim().is_empty() {
            anyhow::bail!("models[].model must not be empty");
        }
        if profile.max_input_tokens == 0 {
            anyhow::bail!("models '{}': max_input_tokens must be > 0", profile.model);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse("[db]\npath = \"./data/prep.sqlite\"\n").unwrap();
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.embedding.dims, 256);
        assert_eq!(cfg.indexer.max_file_tokens, 8_000);
        assert!(cfg.indexer.prune_orphans);
        assert!(!cfg.retrieval.dynamic_threshold);
        assert_eq!(cfg.source.kind, "github");
        assert!(cfg.models.is_empty());
    }

    #[test]
    fn test_model_entries_parse() {
        let cfg = parse(
            r#"
[db]
path = "prep.sqlite"

[[models]]
model = "local-llama"
max_input_tokens = 6000
max_output_tokens = 1024
input_cost = 0.0
output_cost = 0.0
"#,
        )
        .unwrap();
        assert_eq!(cfg.models.len(), 1);
        assert_eq!(cfg.models[0].max_input_tokens, 6000);
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_git_source_requires_root() {
        assert!(parse("[db]\npath = \"x\"\n[source]\nkind = \"git\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[source]\nkind = \"git\"\nroot = \"/srv/repos\"\n").is_ok());
    }

    #[test]
    fn test_file_limit_must_fit_embedding_batch() {
        let src = "[db]\npath = \"x\"\n[indexer]\nmax_file_tokens = 9000\n";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/codeprep.example.toml");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.indexer.exclude_globs, vec!["**/fixtures/**"]);
        assert_eq!(cfg.models.len(), 1);
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/missing/prep.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
