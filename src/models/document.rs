//! Document and section types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(Uuid);

impl SectionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Source format of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Markdown with heading-delimited sections.
    #[default]
    Markdown,
    /// JSON with object-keyed sections.
    Json,
    /// YAML with object-keyed sections.
    Yaml,
    /// Plain text with paragraph-delimited sections.
    Text,
}

impl DocumentFormat {
    /// Returns the format as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "text" | "txt" => Ok(Self::Text),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown document format: {other}"
            ))),
        }
    }
}

/// The kind of knowledge artifact a document represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// A specification.
    Spec,
    /// A how-to guide.
    Guide,
    /// A handoff document.
    Handoff,
    /// A prompt artifact.
    Prompt,
    /// A report.
    #[default]
    Report,
    /// Reference material.
    Reference,
    /// A recorded decision.
    Decision,
    /// A retired document kept for provenance.
    Archive,
    /// Reserved: a partially-ingested document, never surfaced by queries.
    Quarantined,
}

impl DocumentType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Guide => "guide",
            Self::Handoff => "handoff",
            Self::Prompt => "prompt",
            Self::Report => "report",
            Self::Reference => "reference",
            Self::Decision => "decision",
            Self::Archive => "archive",
            Self::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" => Ok(Self::Spec),
            "guide" => Ok(Self::Guide),
            "handoff" => Ok(Self::Handoff),
            "prompt" => Ok(Self::Prompt),
            "report" => Ok(Self::Report),
            "reference" => Ok(Self::Reference),
            "decision" => Ok(Self::Decision),
            "archive" => Ok(Self::Archive),
            "quarantined" => Ok(Self::Quarantined),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown document type: {other}"
            ))),
        }
    }
}

/// An ingested knowledge document.
///
/// Documents are never hard-deleted: deprecation mutates the
/// frontmatter (or the type, for archival) so provenance links remain
/// resolvable.
#[derive(Debug, Clone)]
pub struct Document {
    /// Unique identifier.
    pub id: DocumentId,
    /// Free-form provenance string: file path, URL, or `inline:<hash>`.
    pub source_path: String,
    /// Stable fingerprint of the post-frontmatter body.
    pub content_hash: String,
    /// Source format.
    pub format: DocumentFormat,
    /// Artifact kind.
    pub document_type: DocumentType,
    /// Document title.
    pub title: String,
    /// Merge/ranking precedence, 1 (lowest) to 10 (highest).
    pub authority_level: u8,
    /// The raw ingested content, frontmatter included.
    pub raw_content: String,
    /// Free-form key-value preface stripped at parse time.
    pub frontmatter: BTreeMap<String, serde_json::Value>,
    /// Optional whole-document embedding.
    pub embedding: Option<Vec<f32>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tag set.
    pub tags: Vec<String>,
}

impl Document {
    /// Whether this document has been deprecated.
    ///
    /// A document is deprecated when its frontmatter records
    /// `deprecated: true` or its type has become [`DocumentType::Archive`].
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        if self.document_type == DocumentType::Archive {
            return true;
        }
        self.frontmatter
            .get("deprecated")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether query and overlap operations may surface this document.
    ///
    /// Quarantined documents are never surfaced; deprecated documents
    /// only when the caller opts in.
    #[must_use]
    pub fn is_queryable(&self, include_deprecated: bool) -> bool {
        if self.document_type == DocumentType::Quarantined {
            return false;
        }
        include_deprecated || !self.is_deprecated()
    }
}

/// A contiguous heading-delimited span of a document.
///
/// Sections of a document form an ordered sequence;
/// `(document_id, section_order)` is unique.
#[derive(Debug, Clone)]
pub struct Section {
    /// Unique identifier.
    pub id: SectionId,
    /// Owning document.
    pub document_id: DocumentId,
    /// Heading text (empty for preamble/paragraph sections).
    pub header: String,
    /// Section body, heading line excluded.
    pub content: String,
    /// Heading depth (0 for headerless sections).
    pub level: u8,
    /// 0-based position within the document.
    pub section_order: u32,
    /// Inclusive 1-based first line in `raw_content`.
    pub start_line: u32,
    /// Inclusive 1-based last line in `raw_content`.
    pub end_line: u32,
    /// Optional section embedding.
    pub embedding: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for fmt in [
            DocumentFormat::Markdown,
            DocumentFormat::Json,
            DocumentFormat::Yaml,
            DocumentFormat::Text,
        ] {
            assert_eq!(fmt.as_str().parse::<DocumentFormat>().ok(), Some(fmt));
        }
    }

    #[test]
    fn test_document_type_unknown() {
        assert!("blog".parse::<DocumentType>().is_err());
    }

    #[test]
    fn test_deprecation_flags() {
        let mut doc = Document {
            id: DocumentId::new(),
            source_path: "a.md".to_string(),
            content_hash: String::new(),
            format: DocumentFormat::Markdown,
            document_type: DocumentType::Spec,
            title: "A".to_string(),
            authority_level: 5,
            raw_content: String::new(),
            frontmatter: BTreeMap::new(),
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            tags: Vec::new(),
        };
        assert!(!doc.is_deprecated());
        assert!(doc.is_queryable(false));

        doc.frontmatter
            .insert("deprecated".to_string(), serde_json::Value::Bool(true));
        assert!(doc.is_deprecated());
        assert!(!doc.is_queryable(false));
        assert!(doc.is_queryable(true));

        doc.frontmatter.clear();
        doc.document_type = DocumentType::Quarantined;
        assert!(!doc.is_queryable(true));
    }
}
