//! Durable and session-scoped record types for the memory subsystem.
//!
//! [`CreationRecord`] is the durable unit of memory — one per completed
//! pipeline run, appended to the user's list in `memory.json`.
//! [`SessionEntry`] is the ephemeral per-user cache merged incrementally
//! across pipeline stages; it never touches disk.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::llm::PromptAnalysis;

/// Sentinel primary category for text matching no category table entry.
pub const UNCATEGORIZED: &str = "uncategorized";

fn default_primary_category() -> String {
    UNCATEGORIZED.to_string()
}

/// The durable record of one generation run.
///
/// `request_id` and `timestamp` are assigned by
/// [`MemoryStore::store_long_term`](super::MemoryStore::store_long_term) when
/// empty and immutable thereafter. `tags` is the only field mutable post-hoc
/// (via `update_tags`) and is kept sorted and deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationRecord {
    /// Unique id within a user's record list. Empty string = not yet assigned.
    #[serde(default)]
    pub request_id: String,
    pub prompt: String,
    #[serde(default)]
    pub expanded_prompt: String,
    #[serde(default)]
    pub analysis: PromptAnalysis,
    /// Sorted, deduplicated classifier output plus analysis subject/setting.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Multi-label categories from the classifier.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_primary_category")]
    pub primary_category: String,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub moods: Vec<String>,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Wall-clock seconds for the full pipeline run.
    #[serde(default)]
    pub processing_time: f64,
    /// RFC 3339, set at first persistence, never changed.
    #[serde(default)]
    pub timestamp: String,
    /// Ephemeral rank attached to search results only — never persisted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub similarity_score: Option<f64>,
}

impl CreationRecord {
    /// A bare record carrying only the original prompt. The pipeline fills
    /// the remaining fields stage by stage.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: String::new(),
            prompt: prompt.into(),
            expanded_prompt: String::new(),
            analysis: PromptAnalysis::default(),
            tags: Vec::new(),
            categories: Vec::new(),
            primary_category: default_primary_category(),
            styles: Vec::new(),
            colors: Vec::new(),
            moods: Vec::new(),
            image_path: None,
            model_path: None,
            processing_time: 0.0,
            timestamp: String::new(),
            similarity_score: None,
        }
    }
}

// ── Session cache ─────────────────────────────────────────────────────────────

/// Partial update merged into a user's [`SessionEntry`].
/// `Some` fields overwrite; `None` fields leave the entry untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub request_id: Option<String>,
    pub prompt: Option<String>,
    pub expanded_prompt: Option<String>,
    pub analysis: Option<PromptAnalysis>,
    pub image_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
}

/// Per-user session cache entry, merged across pipeline stages.
/// Lost on process restart by design.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEntry {
    pub request_id: Option<String>,
    pub prompt: Option<String>,
    pub expanded_prompt: Option<String>,
    pub analysis: Option<PromptAnalysis>,
    pub image_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    /// Refreshed on every merge.
    pub timestamp: String,
}

impl SessionEntry {
    /// Merge `patch` into this entry. Only `Some` fields overwrite.
    /// The caller stamps `timestamp` afterwards.
    pub fn merge(&mut self, patch: SessionPatch) {
        if let Some(v) = patch.request_id {
            self.request_id = Some(v);
        }
        if let Some(v) = patch.prompt {
            self.prompt = Some(v);
        }
        if let Some(v) = patch.expanded_prompt {
            self.expanded_prompt = Some(v);
        }
        if let Some(v) = patch.analysis {
            self.analysis = Some(v);
        }
        if let Some(v) = patch.image_path {
            self.image_path = Some(v);
        }
        if let Some(v) = patch.model_path {
            self.model_path = Some(v);
        }
    }
}
