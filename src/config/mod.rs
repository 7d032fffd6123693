//! Configuration management for Quarry
//!
//! Loading, environment overrides and validation of the TOML configuration.
//! Every tunable the engine uses (BM25 constants, ranking profiles, timeouts,
//! worker counts) lives here so deployments can adjust behaviour without code.

use crate::document::ContentType;
use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub indexing: IndexingConfig,
    pub query: QueryConfig,
    pub ranking: RankingConfig,
    pub server: ServerConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Bodies at least this many bytes long are stored zstd-compressed
    pub compression_threshold: usize,
    pub pool_size: u32,
    pub timeout_ms: u64,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub model: String,
    /// Fixed cluster-wide embedding dimension
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_ms: u64,
}

/// Description enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 2000,
        }
    }
}

/// Index engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub k1: f32,
    pub b: f32,
    pub title_boost: f32,
    pub body_boost: f32,
    pub description_boost: f32,
    pub lock_shards: usize,
    pub ingest_workers: usize,
    pub max_token_len: usize,
}

/// Query planning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Candidates pulled from each retrieval path before ranking
    pub candidate_limit: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

/// Weights used to compose a final score for one content type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingProfile {
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub relevance_weight: f32,
    pub quality_weight: f32,
    pub freshness_weight: f32,
    pub freshness_half_life_days: f32,
}

impl Default for RankingProfile {
    fn default() -> Self {
        Self {
            lexical_weight: 0.5,
            vector_weight: 0.5,
            relevance_weight: 0.8,
            quality_weight: 0.2,
            freshness_weight: 0.0,
            freshness_half_life_days: 30.0,
        }
    }
}

/// Ranking configuration with per-content-type profile overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub default: RankingProfile,
    /// Keyed by content type name ("web", "image", "video")
    #[serde(default)]
    pub profiles: BTreeMap<String, RankingProfile>,
    pub snippet_width: usize,
    pub max_highlights: usize,
}

impl RankingConfig {
    /// Profile for a content type, falling back to the default profile
    pub fn profile_for(&self, content_type: ContentType) -> &RankingProfile {
        self.profiles
            .get(content_type.as_str())
            .unwrap_or(&self.default)
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            ContentType::Image.as_str().to_string(),
            RankingProfile {
                relevance_weight: 0.65,
                quality_weight: 0.35,
                ..RankingProfile::default()
            },
        );

        Self {
            default: RankingProfile::default(),
            profiles,
            snippet_width: 80,
            max_highlights: 3,
        }
    }
}

/// Socket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    pub request_timeout_ms: u64,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QuarryError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("QUARRY_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "EMBEDDING__ENABLED" => {
                self.embedding.enabled = parse_env(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DIMENSION" => {
                self.embedding.dimension = parse_env(path, value)?;
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "SERVER__SOCKET_PATH" => {
                self.server.socket_path = PathBuf::from(value);
            }
            "INDEXING__INGEST_WORKERS" => {
                self.indexing.ingest_workers = parse_env(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }

    /// Configuration rooted at a specific data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let mut config = Self::default();
        config.server.socket_path = data_dir.join("quarry.sock");
        config.storage.data_dir = data_dir;
        config
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| QuarryError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.quarry");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                compression_threshold: 4096,
                pool_size: 8,
                timeout_ms: 5000,
            },
            embedding: EmbeddingConfig {
                enabled: true,
                model: "bge-base-en-v1.5".to_string(),
                dimension: 768,
                batch_size: 32,
                timeout_ms: 2000,
            },
            enrichment: EnrichmentConfig::default(),
            indexing: IndexingConfig {
                k1: 1.2,
                b: 0.75,
                title_boost: 2.0,
                body_boost: 1.0,
                description_boost: 1.0,
                lock_shards: 64,
                ingest_workers: 4,
                max_token_len: 40,
            },
            query: QueryConfig {
                candidate_limit: 200,
                default_page_size: 10,
                max_page_size: 100,
            },
            ranking: RankingConfig::default(),
            server: ServerConfig {
                socket_path: data_dir.join("quarry.sock"),
                max_connections: 64,
                request_timeout_ms: 30_000,
            },
        }
    }
}
