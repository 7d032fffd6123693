use crate::config::{Config, RankingProfile};
use crate::document::ContentType;
use crate::error::{QuarryError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_query(config, &mut errors);
        Self::validate_ranking(config, &mut errors);
        Self::validate_server(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }

        if config.storage.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "storage.timeout_ms",
                "Storage timeout must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.enabled && config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_ms",
                "Embedding timeout must be greater than 0",
            ));
        }

        if config.enrichment.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "enrichment.timeout_ms",
                "Enrichment timeout must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;

        if !(indexing.k1 >= 0.0 && indexing.k1.is_finite()) {
            errors.push(ValidationError::new(
                "indexing.k1",
                format!("k1 must be a non-negative number, got {}", indexing.k1),
            ));
        }

        if !(0.0..=1.0).contains(&indexing.b) {
            errors.push(ValidationError::new(
                "indexing.b",
                format!("b must be between 0.0 and 1.0, got {}", indexing.b),
            ));
        }

        for (path, boost) in [
            ("indexing.title_boost", indexing.title_boost),
            ("indexing.body_boost", indexing.body_boost),
            ("indexing.description_boost", indexing.description_boost),
        ] {
            if !(boost >= 0.0 && boost.is_finite()) {
                errors.push(ValidationError::new(
                    path,
                    format!("Field boost must be a non-negative number, got {}", boost),
                ));
            }
        }

        if indexing.lock_shards == 0 {
            errors.push(ValidationError::new(
                "indexing.lock_shards",
                "Lock shard count must be greater than 0",
            ));
        }

        if indexing.ingest_workers == 0 {
            errors.push(ValidationError::new(
                "indexing.ingest_workers",
                "Ingest worker count must be greater than 0",
            ));
        }

        if indexing.max_token_len == 0 {
            errors.push(ValidationError::new(
                "indexing.max_token_len",
                "Maximum token length must be greater than 0",
            ));
        }
    }

    fn validate_query(config: &Config, errors: &mut Vec<ValidationError>) {
        let query = &config.query;

        if query.candidate_limit == 0 {
            errors.push(ValidationError::new(
                "query.candidate_limit",
                "Candidate limit must be greater than 0",
            ));
        }

        if query.default_page_size == 0 || query.max_page_size == 0 {
            errors.push(ValidationError::new(
                "query.default_page_size",
                "Page sizes must be greater than 0",
            ));
        }

        if query.default_page_size > query.max_page_size {
            errors.push(ValidationError::new(
                "query.default_page_size",
                format!(
                    "Default page size {} exceeds max page size {}",
                    query.default_page_size, query.max_page_size
                ),
            ));
        }
    }

    fn validate_ranking(config: &Config, errors: &mut Vec<ValidationError>) {
        Self::validate_profile("ranking.default", &config.ranking.default, errors);

        for (name, profile) in &config.ranking.profiles {
            if ContentType::parse(name).is_none() {
                errors.push(ValidationError::new(
                    format!("ranking.profiles.{}", name),
                    format!("Unknown content type '{}'", name),
                ));
            }
            Self::validate_profile(&format!("ranking.profiles.{}", name), profile, errors);
        }

        if config.ranking.snippet_width == 0 {
            errors.push(ValidationError::new(
                "ranking.snippet_width",
                "Snippet width must be greater than 0",
            ));
        }
    }

    fn validate_profile(path: &str, profile: &RankingProfile, errors: &mut Vec<ValidationError>) {
        for (key, weight) in [
            ("lexical_weight", profile.lexical_weight),
            ("vector_weight", profile.vector_weight),
            ("relevance_weight", profile.relevance_weight),
            ("quality_weight", profile.quality_weight),
            ("freshness_weight", profile.freshness_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    format!("{}.{}", path, key),
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }

        let total = profile.relevance_weight + profile.quality_weight + profile.freshness_weight;
        if (total - 1.0).abs() > 1e-3 {
            errors.push(ValidationError::new(
                path,
                format!(
                    "relevance, quality and freshness weights must sum to 1.0, got {}",
                    total
                ),
            ));
        }

        if !(profile.freshness_half_life_days > 0.0) {
            errors.push(ValidationError::new(
                format!("{}.freshness_half_life_days", path),
                "Freshness half-life must be greater than 0",
            ));
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "server.socket_path",
                "Socket path cannot be empty",
            ));
        }

        if config.server.max_connections == 0 {
            errors.push(ValidationError::new(
                "server.max_connections",
                "Max connections must be greater than 0",
            ));
        }

        if config.server.request_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "server.request_timeout_ms",
                "Request timeout must be greater than 0",
            ));
        }
    }
}
