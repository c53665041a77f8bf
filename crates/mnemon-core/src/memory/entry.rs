//! Entry - The fundamental unit of memory
//!
//! Each entry represents a discrete piece of stored text with:
//! - Content, tags and typed context metadata
//! - Importance and confidence in [0, 1]
//! - A learned Q-value (neutral 0.5)
//! - An embedding-pending flag for degraded ingest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTRY SOURCE
// ============================================================================

/// Where an entry originated
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Entered directly by a human user
    #[default]
    User,
    /// Produced by an agent run
    Agent,
    /// Emitted by a tool invocation
    Tool,
    /// Generated by the engine itself
    System,
    /// Imported from an outside system
    External,
}

impl EntrySource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::User => "user",
            EntrySource::Agent => "agent",
            EntrySource::Tool => "tool",
            EntrySource::System => "system",
            EntrySource::External => "external",
        }
    }

    /// Parse from string name, defaulting to `User`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" => EntrySource::User,
            "agent" => EntrySource::Agent,
            "tool" => EntrySource::Tool,
            "system" => EntrySource::System,
            "external" => EntrySource::External,
            _ => EntrySource::User,
        }
    }
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ENTRY
// ============================================================================

/// A stored memory entry
///
/// The persistence layer is authoritative for every field; the vector index
/// only ever sees the integer label mapped to `id`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// The stored text
    pub content: String,
    /// Where the entry came from
    pub source: EntrySource,
    /// Caller-assigned importance (0.0 - 1.0)
    pub importance: f64,
    /// Confidence in the content itself (0.0 - 1.0)
    pub confidence: f64,
    /// Tags for categorization and filtering
    pub tags: Vec<String>,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// When the entry was last modified
    pub updated_at: DateTime<Utc>,
    /// Session the entry belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agent that produced the entry, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Unrecognized context keys, preserved verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Learned Q-value (neutral 0.5)
    pub q_value: f64,
    /// True while the entry has no vector in the index
    pub pending_embedding: bool,
}

impl Default for Entry {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content: String::new(),
            source: EntrySource::User,
            importance: 0.5,
            confidence: 1.0,
            tags: vec![],
            created_at: now,
            updated_at: now,
            session_id: None,
            agent_id: None,
            context: None,
            q_value: 0.5,
            pending_embedding: false,
        }
    }
}

impl Entry {
    /// Create a new entry with the given content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Characters never allowed in tags (control characters break the tag index
/// and the structured event log)
pub(crate) fn tag_is_valid(tag: &str) -> bool {
    !tag.is_empty() && !tag.chars().any(|c| c.is_control())
}

/// Input for storing a new entry
///
/// Uses `deny_unknown_fields` to prevent field injection; free-form context
/// goes through the explicit `context` passthrough instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StoreInput {
    /// The content to store
    pub content: String,
    /// Where the entry came from
    #[serde(default)]
    pub source: EntrySource,
    /// Caller-assigned importance (0.0 - 1.0)
    #[serde(default = "default_importance")]
    pub importance: f64,
    /// Confidence in the content (0.0 - 1.0)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Relevance of this entry to its parents (0.0 - 1.0)
    #[serde(default = "default_confidence")]
    pub relevance: f64,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Parent entry ids this entry was derived from
    #[serde(default)]
    pub parents: Vec<String>,
    /// Session the entry belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agent that produced the entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Unrecognized context keys, preserved verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

fn default_importance() -> f64 {
    0.5
}

fn default_confidence() -> f64 {
    1.0
}

impl Default for StoreInput {
    fn default() -> Self {
        Self {
            content: String::new(),
            source: EntrySource::User,
            importance: 0.5,
            confidence: 1.0,
            relevance: 1.0,
            tags: vec![],
            parents: vec![],
            session_id: None,
            agent_id: None,
            context: None,
        }
    }
}

impl StoreInput {
    /// Shorthand for a plain content-only input
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Partial update applied by `edit`
///
/// Every field is optional; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EntryPatch {
    /// Replace the content (triggers re-embedding)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Replace the tag set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Replace the importance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Replace the confidence (triggers L-Score propagation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Replace the passthrough context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl EntryPatch {
    /// True if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.tags.is_none()
            && self.importance.is_none()
            && self.confidence.is_none()
            && self.context.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================
