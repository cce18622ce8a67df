use serde::{Deserialize, Serialize};

/// A bounded segment of a source document with provenance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentChunk {
    /// Source document path or identifier
    pub source: String,

    /// Page number in the source document, if paginated (1-indexed)
    pub page: Option<usize>,

    /// The actual text content
    pub content: String,

    /// Metadata about this chunk
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    /// Create a new document chunk
    #[must_use]
    pub const fn new(
        source: String,
        page: Option<usize>,
        content: String,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            source,
            page,
            content,
            metadata,
        }
    }

    /// Get estimated token count
    #[must_use]
    pub const fn estimated_tokens(&self) -> usize {
        self.metadata.estimated_tokens
    }

    /// Check if the chunk carries any text at all
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Metadata about a document chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Section or heading this chunk belongs to
    pub section: Option<String>,

    /// Title of the source document, if known
    pub title: Option<String>,

    /// Tags for categorization (e.g. "table", "abstract", "references")
    #[serde(default)]
    pub tags: Vec<String>,

    /// Estimated token count (rough approximation)
    pub estimated_tokens: usize,
}

impl ChunkMetadata {
    /// Create metadata with a section heading only
    pub fn with_section(section: impl Into<String>) -> Self {
        Self {
            section: Some(section.into()),
            ..Default::default()
        }
    }

    /// Builder: set document title
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder: add tag
    #[must_use]
    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder: set estimated tokens
    #[must_use]
    pub const fn estimated_tokens(mut self, tokens: usize) -> Self {
        self.estimated_tokens = tokens;
        self
    }

    /// Estimate tokens from content (rough heuristic: ~4 chars per token)
    #[must_use]
    pub fn estimate_tokens_from_content(content: &str) -> usize {
        (content.len() / 4).max(1)
    }
}
