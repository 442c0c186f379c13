//! Memory subsystem — session cache plus durable creation store.
//!
//! Two tiers, mirroring how the pipeline uses them:
//!
//! * **Short-term** — an in-process per-user [`SessionEntry`] merged
//!   incrementally across pipeline stages. Never persisted.
//! * **Long-term** — one JSON document mapping `user_id` to an ordered list
//!   of [`CreationRecord`]s, enriched at write time by the [`Tagger`] and
//!   mirrored into the [`SemanticIndex`].
//!
//! ```text
//! {data_dir}/
//! ├── memory.json    user_id -> [CreationRecord, ...]
//! └── index.json     semantic index (ids, metadata, tags, vectors)
//! ```
//!
//! The durable document is accessed via whole-file read-modify-write with a
//! temp-file + atomic-rename on the write side. There is no locking: a
//! single writer is assumed, and concurrent `store_long_term`/`update_tags`
//! callers must serialize externally.
//!
//! Retrieval is hybrid: searches go to the semantic index first and fall
//! back to deterministic substring/overlap scans of the durable records only
//! when the index yields nothing.

pub mod index;
pub mod record;
pub mod tagger;

pub use index::{IndexMetadata, SearchHit, SemanticIndex};
pub use record::{CreationRecord, SessionEntry, SessionPatch};
pub use tagger::{Classification, Tagger};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::config::{EmbeddingConfig, MemoryConfig};
use crate::error::AppError;

const MEMORY_FILENAME: &str = "memory.json";

/// Fallback score when the query matches the stored prompt.
const FALLBACK_PROMPT_SCORE: f64 = 0.5;
/// Fallback score when the query matches only the expanded prompt.
const FALLBACK_EXPANDED_SCORE: f64 = 0.4;
/// Fallback score when the query matches only a tag (opt-in, see config).
const FALLBACK_TAG_SCORE: f64 = 0.3;

/// On-disk shape of `memory.json`. BTreeMap keeps output stable across runs.
type StoreFile = BTreeMap<String, Vec<CreationRecord>>;

/// Durable per-user record store plus ephemeral session cache.
pub struct MemoryStore {
    memory_file: PathBuf,
    short_term: HashMap<String, SessionEntry>,
    tagger: Tagger,
    index: SemanticIndex,
    /// Whether the substring search fallback also matches stored tags.
    fallback_matches_tags: bool,
}

impl MemoryStore {
    /// Create or open the store under `data_dir`.
    pub fn open(
        data_dir: &Path,
        memory: &MemoryConfig,
        embedding: &EmbeddingConfig,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(data_dir)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", data_dir.display())))?;
        let index = SemanticIndex::open(embedding, data_dir, api_key);
        Self::with_index(data_dir.join(MEMORY_FILENAME), index, memory.fallback_matches_tags)
    }

    /// Construct over an explicit memory file and index. Tests use this with
    /// [`SemanticIndex::in_memory`].
    pub fn with_index(
        memory_file: PathBuf,
        index: SemanticIndex,
        fallback_matches_tags: bool,
    ) -> Result<Self, AppError> {
        if !memory_file.exists() {
            if let Some(parent) = memory_file.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Memory(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            fs::write(&memory_file, "{}").map_err(|e| {
                AppError::Memory(format!("cannot create {}: {e}", memory_file.display()))
            })?;
            info!(path = %memory_file.display(), "created memory store");
        }
        Ok(Self {
            memory_file,
            short_term: HashMap::new(),
            tagger: Tagger::new(),
            index,
            fallback_matches_tags,
        })
    }

    /// Direct access to the semantic index for housekeeping operations.
    ///
    /// Deleting an index item does NOT remove the durable record — an
    /// intentional asymmetry callers must be aware of.
    pub fn index_mut(&mut self) -> &mut SemanticIndex {
        &mut self.index
    }

    // ── Short-term ────────────────────────────────────────────────────────

    /// Merge `patch` into the user's session entry, re-stamping its timestamp.
    pub fn store_short_term(&mut self, user_id: &str, patch: SessionPatch) {
        let entry = self.short_term.entry(user_id.to_string()).or_default();
        entry.merge(patch);
        entry.timestamp = now_iso8601();
        debug!(%user_id, "session cache updated");
    }

    /// Current merged session entry, default/empty when none exists.
    pub fn retrieve_short_term(&self, user_id: &str) -> SessionEntry {
        self.short_term.get(user_id).cloned().unwrap_or_default()
    }

    // ── Long-term ─────────────────────────────────────────────────────────

    /// Persist `record` under `user_id`, enriching it on the way in.
    ///
    /// Assigns `request_id` and `timestamp` when absent, runs the tagger over
    /// the combined prompt text, mirrors the record into the semantic index
    /// (index failure is logged, not fatal), and appends to the durable list.
    /// Returns the enriched record as stored.
    pub fn store_long_term(
        &mut self,
        user_id: &str,
        mut record: CreationRecord,
    ) -> Result<CreationRecord, AppError> {
        if record.request_id.is_empty() {
            record.request_id = uuid::Uuid::new_v4().to_string();
        }
        if record.timestamp.is_empty() {
            record.timestamp = now_iso8601();
        }
        // Scores are ephemeral — they never reach disk.
        record.similarity_score = None;

        let expanded = (!record.expanded_prompt.is_empty()).then_some(record.expanded_prompt.as_str());
        let classification = self.tagger.analyze(&record.prompt, expanded, Some(&record.analysis));
        record.tags = classification.tags;
        record.categories = classification.categories;
        record.primary_category = classification.primary_category;
        record.styles = classification.styles;
        record.colors = classification.colors;
        record.moods = classification.moods;

        let combined = match expanded {
            Some(expanded) => format!("{} {}", record.prompt, expanded),
            None => record.prompt.clone(),
        };
        let metadata = IndexMetadata {
            user_id: user_id.to_string(),
            prompt: record.prompt.clone(),
            expanded_prompt: record.expanded_prompt.clone(),
            image_path: record.image_path.clone(),
            model_path: record.model_path.clone(),
            timestamp: record.timestamp.clone(),
            primary_category: record.primary_category.clone(),
        };
        if let Err(e) =
            self.index.add_item(&record.request_id, &combined, metadata, record.tags.clone())
        {
            warn!(request_id = %record.request_id, error = %e, "cannot mirror record into index");
        }

        let mut store = self.read_store()?;
        store.entry(user_id.to_string()).or_default().push(record.clone());
        self.write_store(&store)?;

        info!(%user_id, request_id = %record.request_id,
            primary_category = %record.primary_category, "stored creation record");
        Ok(record)
    }

    /// The user's records, newest first, truncated to `limit` when given.
    pub fn retrieve_long_term(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CreationRecord>, AppError> {
        let store = self.read_store()?;
        let mut records = store.get(user_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    // ── Search ────────────────────────────────────────────────────────────

    /// Hybrid free-text search over the user's records.
    ///
    /// Primary path: top-[`index::DEFAULT_SEARCH_K`] nearest neighbors from
    /// the semantic index, filtered to this user and hydrated to full durable
    /// records with their similarity attached. Fallback (only when the
    /// primary path yields nothing): case-insensitive substring scan —
    /// a prompt match scores 0.5, otherwise an expanded-prompt match scores
    /// 0.4; first matching field wins per record.
    pub fn search_memory(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<CreationRecord>, AppError> {
        let store = self.read_store()?;
        let records = store.get(user_id).map(Vec::as_slice).unwrap_or_default();

        let hits = match self.index.search_by_text(query, index::DEFAULT_SEARCH_K, None) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "semantic search failed, using substring fallback");
                Vec::new()
            }
        };

        let mut results: Vec<CreationRecord> = hits
            .into_iter()
            .filter(|hit| hit.metadata.user_id == user_id)
            .filter_map(|hit| {
                records.iter().find(|r| r.request_id == hit.id).map(|r| {
                    let mut r = r.clone();
                    r.similarity_score = hit.similarity;
                    r
                })
            })
            .collect();

        if results.is_empty() {
            results = self.substring_fallback(records, query);
        }
        Ok(results)
    }

    fn substring_fallback(&self, records: &[CreationRecord], query: &str) -> Vec<CreationRecord> {
        let query = query.to_lowercase();
        let mut results = Vec::new();
        for record in records {
            let score = if record.prompt.to_lowercase().contains(&query) {
                Some(FALLBACK_PROMPT_SCORE)
            } else if record.expanded_prompt.to_lowercase().contains(&query) {
                Some(FALLBACK_EXPANDED_SCORE)
            } else if self.fallback_matches_tags
                && record.tags.iter().any(|t| t.to_lowercase().contains(&query))
            {
                Some(FALLBACK_TAG_SCORE)
            } else {
                None
            };
            if let Some(score) = score {
                let mut r = record.clone();
                r.similarity_score = Some(score);
                results.push(r);
            }
        }
        results
    }

    /// Tag search (OR semantics). Primary path via the index, fallback scans
    /// durable records for any tag overlap. The `limit` cap applies after
    /// restricting to the user — the index holds all users' items, so
    /// capping earlier would drop this user's matches.
    pub fn search_by_tags(
        &self,
        user_id: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<CreationRecord>, AppError> {
        let store = self.read_store()?;
        let records = store.get(user_id).map(Vec::as_slice).unwrap_or_default();

        let mut results: Vec<CreationRecord> = self
            .index
            .search_by_tags(tags, usize::MAX)
            .into_iter()
            .filter(|hit| hit.metadata.user_id == user_id)
            .filter_map(|hit| records.iter().find(|r| r.request_id == hit.id).cloned())
            .collect();

        if results.is_empty() {
            results = records
                .iter()
                .filter(|r| r.tags.iter().any(|t| tags.contains(t)))
                .take(limit)
                .cloned()
                .collect();
        }
        results.truncate(limit);
        Ok(results)
    }

    /// Category filter over durable records only — no semantic fallback.
    pub fn search_by_category(
        &self,
        user_id: &str,
        category: &str,
        limit: usize,
    ) -> Result<Vec<CreationRecord>, AppError> {
        let store = self.read_store()?;
        Ok(store
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|r| {
                r.primary_category == category || r.categories.iter().any(|c| c == category)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    /// Overwrite the tags of the record with `request_id`.
    ///
    /// Tags are deduplicated and sorted before storage, and the new set is
    /// propagated to the semantic index entry. Returns `false` (no-op) when
    /// the record is not found.
    pub fn update_tags(
        &mut self,
        user_id: &str,
        request_id: &str,
        tags: &[String],
    ) -> Result<bool, AppError> {
        let mut store = self.read_store()?;
        let Some(record) = store
            .get_mut(user_id)
            .and_then(|records| records.iter_mut().find(|r| r.request_id == request_id))
        else {
            warn!(%user_id, %request_id, "cannot update tags: record not found");
            return Ok(false);
        };

        let tags: BTreeSet<String> = tags.iter().cloned().collect();
        record.tags = tags.into_iter().collect();
        let new_tags = record.tags.clone();
        self.write_store(&store)?;

        if let Err(e) = self.index.update_item_tags(request_id, &new_tags) {
            warn!(%request_id, error = %e, "cannot propagate tags to index");
        }
        Ok(true)
    }

    /// All distinct tags across the user's records, sorted.
    pub fn get_all_tags(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let store = self.read_store()?;
        let tags: BTreeSet<String> = store
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .flat_map(|r| r.tags.iter().cloned())
            .collect();
        Ok(tags.into_iter().collect())
    }

    /// All distinct categories across the user's records, sorted.
    pub fn get_all_categories(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let store = self.read_store()?;
        let categories: BTreeSet<String> = store
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .flat_map(|r| r.categories.iter().cloned())
            .collect();
        Ok(categories.into_iter().collect())
    }

    // ── File I/O ──────────────────────────────────────────────────────────

    fn read_store(&self) -> Result<StoreFile, AppError> {
        let data = fs::read_to_string(&self.memory_file).map_err(|e| {
            AppError::Memory(format!("cannot read {}: {e}", self.memory_file.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            AppError::Memory(format!("malformed {}: {e}", self.memory_file.display()))
        })
    }

    fn write_store(&self, store: &StoreFile) -> Result<(), AppError> {
        let data = serde_json::to_string_pretty(store)
            .map_err(|e| AppError::Memory(format!("serialize store: {e}")))?;
        let tmp = self.memory_file.with_extension("json.tmp");
        fs::write(&tmp, data)
            .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.memory_file).map_err(|e| {
            AppError::Memory(format!("cannot replace {}: {e}", self.memory_file.display()))
        })
    }
}

/// Current UTC time as RFC 3339 with second precision, e.g.
/// `"2026-04-01T12:00:00Z"`.
fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
