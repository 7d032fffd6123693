//! Document model and ingestion-time validation

use crate::error::{QuarryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum accepted length of a caller-supplied document id
pub const MAX_ID_LEN: usize = 256;

/// Quality prior assumed when the caller does not provide one
pub const DEFAULT_QUALITY_SCORE: f32 = 50.0;

/// Kind of content a document represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Web,
    Image,
    Video,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Web, ContentType::Image, ContentType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Parse a content type name (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Some(Self::Web),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document as submitted for ingestion
///
/// Loosely typed on purpose: a bad `contentType` or an empty title must be
/// reported for this document alone rather than failing the whole request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl NewDocument {
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type.as_str().to_string());
        self
    }

    pub fn with_quality(mut self, quality_score: f32) -> Self {
        self.quality_score = Some(quality_score);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Id as given, trimmed, for error reporting
    pub fn display_id(&self) -> Option<String> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Validate and normalise into a storable document
    ///
    /// `dimension` is the deployment-wide embedding dimension; a supplied
    /// embedding of any other length fails this document.
    pub fn validate(self, dimension: usize) -> Result<ValidatedDocument> {
        let id = match self.display_id() {
            Some(id) if id.chars().count() > MAX_ID_LEN => {
                return Err(QuarryError::validation(
                    "id",
                    format!("id must be at most {} characters", MAX_ID_LEN),
                ));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(QuarryError::validation("title", "title cannot be empty"));
        }

        let body = self.body.trim().to_string();
        if body.is_empty() {
            return Err(QuarryError::validation("body", "body cannot be empty"));
        }

        let content_type = match self.content_type.as_deref() {
            None => ContentType::Web,
            Some(raw) => ContentType::parse(raw).ok_or_else(|| {
                QuarryError::validation(
                    "contentType",
                    format!("unknown content type '{}', expected web, image or video", raw),
                )
            })?,
        };

        let quality_score = self.quality_score.unwrap_or(DEFAULT_QUALITY_SCORE);
        if !quality_score.is_finite() || !(0.0..=100.0).contains(&quality_score) {
            return Err(QuarryError::validation(
                "qualityScore",
                format!("qualityScore must be within [0, 100], got {}", quality_score),
            ));
        }

        if let Some(embedding) = &self.embedding {
            if embedding.len() != dimension {
                return Err(QuarryError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
        }

        let tags: BTreeSet<String> = self
            .tags
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();

        let category = self
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let created_at_supplied = self.created_at.is_some();
        let mut document = Document {
            id,
            title,
            body,
            url: self.url.trim().to_string(),
            content_type,
            tags,
            category,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            quality_score,
            description: None,
            version: 0,
            content_hash: String::new(),
        };
        document.content_hash = document.compute_hash();

        Ok(ValidatedDocument {
            document,
            embedding: self.embedding,
            created_at_supplied,
        })
    }
}

impl From<&Document> for NewDocument {
    fn from(document: &Document) -> Self {
        Self {
            id: Some(document.id.clone()),
            title: document.title.clone(),
            body: document.body.clone(),
            url: document.url.clone(),
            content_type: Some(document.content_type.as_str().to_string()),
            tags: document.tags.iter().cloned().collect(),
            category: document.category.clone(),
            created_at: Some(document.created_at),
            quality_score: Some(document.quality_score),
            embedding: None,
        }
    }
}

/// Output of [`NewDocument::validate`]
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub document: Document,
    pub embedding: Option<Vec<f32>>,
    /// False when `created_at` was defaulted to now
    pub created_at_supplied: bool,
}

/// A stored document version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub content_type: ContentType,
    pub tags: BTreeSet<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub quality_score: f32,
    /// Optional enrichment output, indexed as its own field
    pub description: Option<String>,
    /// Incremented on every effective upsert
    pub version: u64,
    pub content_hash: String,
}

impl Document {
    /// BLAKE3 hash over every caller-controlled field
    pub fn compute_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [
            self.title.as_str(),
            self.body.as_str(),
            self.url.as_str(),
            self.content_type.as_str(),
            self.category.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0u8]);
        }
        for tag in &self.tags {
            hasher.update(tag.as_bytes());
            hasher.update(&[1u8]);
        }
        hasher.update(&self.quality_score.to_bits().to_le_bytes());
        hasher.update(&self.created_at.timestamp_millis().to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Text handed to the embedding provider
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}
