//! Configuration management.

use serde::Deserialize;
use std::borrow::Cow;
use std::path::PathBuf;

/// Expands environment variable references in a string.
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left as-is.
#[must_use]
pub fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;
    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        let Some(var_end) = result[var_start..].find('}') else {
            break;
        };
        let var_end = var_start + var_end;
        let var_name = result[var_start + 2..var_end].to_string();
        if let Ok(value) = std::env::var(&var_name) {
            result.replace_range(var_start..=var_end, &value);
            start = var_start + value.len();
        } else {
            start = var_end + 1;
        }
    }
    Cow::Owned(result)
}

/// Main configuration for doctrine.
#[derive(Debug, Clone, Default)]
pub struct DoctrineConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Embedding configuration.
    pub embedding: EmbeddingConfig,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// Pipeline thresholds.
    pub thresholds: ThresholdConfig,
    /// Whether the entity co-occurrence graph is maintained.
    pub entity_graph_enabled: bool,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database. `None` selects the default data dir.
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolves the database path, defaulting to the platform data dir.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        directories::ProjectDirs::from("dev", "doctrine", "doctrine").map_or_else(
            || PathBuf::from("doctrine.db"),
            |dirs| dirs.data_dir().join("doctrine.db"),
        )
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "fastembed".
    pub provider: String,
    /// Embedding vector width.
    pub dimensions: usize,
    /// Batch size for bulk embedding.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            dimensions: 384,
            batch_size: 32,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "anthropic", "ollama", or "none".
    pub provider: String,
    /// Model name override.
    pub model: Option<String>,
    /// API key (supports `${VAR}` references).
    pub api_key: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Maximum retries for LLM calls.
    pub max_retries: Option<u32>,
    /// Initial retry backoff in milliseconds.
    pub retry_backoff_ms: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            model: None,
            api_key: None,
            timeout_ms: None,
            max_retries: None,
            retry_backoff_ms: None,
        }
    }
}

/// Thresholds governing similarity, conflict, and resolution routing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Overlap clustering similarity threshold.
    pub similarity: f32,
    /// Minimum strength for a value conflict.
    pub value_conflict: f32,
    /// Entity alias attachment threshold.
    pub entity_alias: f32,
    /// Minimum conflict confidence for auto resolution.
    pub conflict_confidence: f32,
    /// Conflicts below this strength auto-resolve.
    pub auto_resolve_below: f32,
    /// Conflicts above this strength require human review.
    pub require_human_above: f32,
    /// Query answer confidence threshold.
    pub answer_confidence: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            similarity: 0.75,
            value_conflict: 0.35,
            entity_alias: 0.88,
            conflict_confidence: 0.7,
            auto_resolve_below: 0.3,
            require_human_above: 0.9,
            answer_confidence: 0.7,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log format ("json" or "pretty").
    pub format: Option<String>,
    /// Full filter override (e.g. "doctrine=debug").
    pub filter: Option<String>,
}

/// On-disk TOML shape of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    storage: StorageConfig,
    embedding: EmbeddingConfig,
    llm: LlmConfig,
    thresholds: ThresholdConfig,
    entity_graph_enabled: Option<bool>,
    logging: LoggingSettings,
}

impl DoctrineConfig {
    /// Loads configuration: defaults, then the optional TOML file, then
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the config file is
    /// malformed.
    pub fn load(config_path: Option<&std::path::Path>) -> crate::Result<Self> {
        let mut config = Self {
            entity_graph_enabled: true,
            ..Self::default()
        };

        if let Some(path) = config_path {
            let text = std::fs::read_to_string(path)
                .map_err(|e| crate::Error::internal("read_config", e))?;
            let file: FileConfig = toml::from_str(&text)
                .map_err(|e| crate::Error::InvalidInput(format!("malformed config: {e}")))?;
            config.storage = file.storage;
            config.embedding = file.embedding;
            config.llm = file.llm;
            config.thresholds = file.thresholds;
            config.logging = file.logging;
            if let Some(enabled) = file.entity_graph_enabled {
                config.entity_graph_enabled = enabled;
            }
        }

        Ok(config.with_env_overrides())
    }

    /// Applies `DOCTRINE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("DOCTRINE_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Ok(provider) = std::env::var("DOCTRINE_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Some(dims) = std::env::var("DOCTRINE_EMBEDDING_DIMENSIONS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.embedding.dimensions = dims;
        }
        if let Ok(provider) = std::env::var("DOCTRINE_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("DOCTRINE_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(similarity) = std::env::var("DOCTRINE_SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
        {
            self.thresholds.similarity = similarity.clamp(0.0, 1.0);
        }
        if let Ok(enabled) = std::env::var("DOCTRINE_ENTITY_GRAPH") {
            self.entity_graph_enabled = enabled != "0" && !enabled.eq_ignore_ascii_case("false");
        }
        self
    }

    /// The resolved API key with `${VAR}` references expanded.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .as_deref()
            .map(|k| expand_env_vars(k).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let t = ThresholdConfig::default();
        assert!((t.similarity - 0.75).abs() < f32::EPSILON);
        assert!((t.value_conflict - 0.35).abs() < f32::EPSILON);
        assert!((t.entity_alias - 0.88).abs() < f32::EPSILON);
        assert!((t.auto_resolve_below - 0.3).abs() < f32::EPSILON);
        assert!((t.require_human_above - 0.9).abs() < f32::EPSILON);

        let e = EmbeddingConfig::default();
        assert_eq!(e.dimensions, 384);
        assert_eq!(e.batch_size, 32);
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("no vars"), "no vars");
        assert_eq!(expand_env_vars("${DOCTRINE_UNSET_VAR_XYZ}"), "${DOCTRINE_UNSET_VAR_XYZ}");
    }

    #[test]
    fn test_load_without_file() {
        let config = DoctrineConfig::load(None).unwrap();
        assert!(config.entity_graph_enabled);
        assert_eq!(config.llm.provider, "none");
    }
}
