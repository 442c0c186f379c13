//! Semantic index — embedding-backed nearest-neighbor store with tag filters.
//!
//! Items are embedded on insert and persisted (vectors included) to
//! `index.json` under the data dir. Search embeds the query and ranks by
//! cosine distance; `similarity = 1 - distance/2` maps the bounded distance
//! onto `[0, 1]`.
//!
//! Degraded mode: when the configured embedder cannot be built or the index
//! file cannot be loaded, the index falls back to an in-memory store with
//! the hash embedder. The contract is unchanged; results are coarser and
//! nothing survives a restart. Callers are not expected to special-case it.

use std::collections::BTreeSet;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::error::AppError;

const INDEX_FILENAME: &str = "index.json";

/// Neighbors fetched per text search before user filtering.
pub const DEFAULT_SEARCH_K: usize = 10;

// ── Embedders ─────────────────────────────────────────────────────────────────

/// All available embedding backends. Enum dispatch, same pattern as the
/// enrichment providers.
#[derive(Debug, Clone)]
pub enum Embedder {
    Hash(HashEmbedder),
    OpenAiCompatible(RemoteEmbedder),
}

impl Embedder {
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Embedder::Hash(e) => Ok(e.embed(text)),
            Embedder::OpenAiCompatible(e) => e.embed(text),
        }
    }
}

/// Deterministic offline embedder: a token-hashed bag-of-words vector.
///
/// Each lowercased token is hashed into one of `dimension` buckets; the
/// resulting count vector is L2-normalized. Coarse, but stable across runs
/// and good enough for the degraded path and for tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

/// OpenAI-style `/v1/embeddings` backend (blocking HTTP).
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    api_base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsRow>,
}

#[derive(Deserialize)]
struct EmbeddingsRow {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(
        api_base_url: String,
        model: String,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Index(format!("build http client: {e}")))?;
        Ok(Self { client, api_base_url, model, api_key })
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let body = serde_json::json!({ "model": self.model, "input": text });
        let mut req = self.client.post(&self.api_base_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .map_err(|e| AppError::Index(format!("embeddings request: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Index(format!("embeddings request: HTTP {status}")));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .map_err(|e| AppError::Index(format!("malformed embeddings response: {e}")))?;

        let mut vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| AppError::Index("embeddings response has no rows".into()))?;
        normalize(&mut vector);
        Ok(vector)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

// ── Index types ───────────────────────────────────────────────────────────────

/// Denormalized identifying fields stored next to each indexed item, so hits
/// can be filtered and displayed without touching the durable store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub expanded_prompt: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub primary_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedItem {
    id: String,
    text: String,
    metadata: IndexMetadata,
    tags: Vec<String>,
    vector: Vec<f32>,
}

/// On-disk shape of `index.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    items: Vec<IndexedItem>,
}

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: IndexMetadata,
    pub tags: Vec<String>,
    /// `None` for tag-only searches.
    pub similarity: Option<f64>,
}

// ── SemanticIndex ─────────────────────────────────────────────────────────────

pub struct SemanticIndex {
    embedder: Embedder,
    /// `None` in degraded mode — nothing is persisted.
    path: Option<PathBuf>,
    items: Vec<IndexedItem>,
}

impl SemanticIndex {
    /// Open (or create) the index under `data_dir`.
    ///
    /// Never fails: any initialization problem degrades to an in-memory
    /// index with the hash embedder, logged at `warn`.
    pub fn open(config: &EmbeddingConfig, data_dir: &Path, api_key: Option<String>) -> Self {
        let embedder = match config.provider.as_str() {
            "openai" | "openai-compatible" => RemoteEmbedder::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.timeout_seconds,
                api_key,
            )
            .map(Embedder::OpenAiCompatible),
            "hash" => Ok(Embedder::Hash(HashEmbedder::new(config.dimension))),
            other => Err(AppError::Index(format!("unknown embedding provider: {other}"))),
        };

        let embedder = match embedder {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "embedding backend unavailable, index degraded to in-memory");
                return Self {
                    embedder: Embedder::Hash(HashEmbedder::new(config.dimension)),
                    path: None,
                    items: Vec::new(),
                };
            }
        };

        let path = data_dir.join(INDEX_FILENAME);
        let items = match load_items(&path) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "cannot load index file, index degraded to in-memory");
                return Self {
                    embedder: Embedder::Hash(HashEmbedder::new(config.dimension)),
                    path: None,
                    items: Vec::new(),
                };
            }
        };

        info!(items = items.len(), path = %path.display(), "semantic index opened");
        Self { embedder, path: Some(path), items }
    }

    /// Purely in-memory index over the hash embedder. Used for tests and as
    /// the degraded-mode construction.
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            embedder: Embedder::Hash(HashEmbedder::new(dimension)),
            path: None,
            items: Vec::new(),
        }
    }

    /// `true` when nothing is persisted (degraded or in-memory construction).
    pub fn is_ephemeral(&self) -> bool {
        self.path.is_none()
    }

    /// Embed `text` and store it with `metadata` and `tags`.
    /// Re-adding an existing id replaces the stored item.
    pub fn add_item(
        &mut self,
        id: &str,
        text: &str,
        metadata: IndexMetadata,
        tags: Vec<String>,
    ) -> Result<(), AppError> {
        let vector = self.embedder.embed(text)?;
        self.items.retain(|item| item.id != id);
        self.items.push(IndexedItem {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            tags,
            vector,
        });
        self.persist()?;
        debug!(%id, "indexed item");
        Ok(())
    }

    /// Top-`k` nearest items to `query`, optionally restricted to items whose
    /// tag set intersects `filter_tags`.
    pub fn search_by_text(
        &self,
        query: &str,
        k: usize,
        filter_tags: Option<&[String]>,
    ) -> Result<Vec<SearchHit>, AppError> {
        let query_vector = self.embedder.embed(query)?;

        let mut scored: Vec<(f64, &IndexedItem)> = self
            .items
            .iter()
            .filter(|item| match filter_tags {
                Some(tags) => item.tags.iter().any(|t| tags.contains(t)),
                None => true,
            })
            .map(|item| {
                // Bounded cosine distance in [0, 2].
                let distance = 1.0 - f64::from(cosine_similarity(&query_vector, &item.vector));
                (1.0 - distance / 2.0, item)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, item)| SearchHit {
                id: item.id.clone(),
                text: item.text.clone(),
                metadata: item.metadata.clone(),
                tags: item.tags.clone(),
                similarity: Some(similarity),
            })
            .collect())
    }

    /// Metadata-only tag filter (OR across `tags`), no embedding involved.
    pub fn search_by_tags(&self, tags: &[String], k: usize) -> Vec<SearchHit> {
        self.items
            .iter()
            .filter(|item| item.tags.iter().any(|t| tags.contains(t)))
            .take(k)
            .map(|item| SearchHit {
                id: item.id.clone(),
                text: item.text.clone(),
                metadata: item.metadata.clone(),
                tags: item.tags.clone(),
                similarity: None,
            })
            .collect()
    }

    /// Overwrite the tags of the item with `id`. Returns `false` when absent.
    pub fn update_item_tags(&mut self, id: &str, tags: &[String]) -> Result<bool, AppError> {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            warn!(%id, "cannot update tags: item not in index");
            return Ok(false);
        };
        item.tags = tags.to_vec();
        self.persist()?;
        Ok(true)
    }

    /// Remove the item with `id` from the index only — the durable record,
    /// if any, is untouched. Returns `false` when absent.
    pub fn delete_item(&mut self, id: &str) -> Result<bool, AppError> {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        let removed = self.items.len() < before;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    /// All distinct tags across the index, sorted.
    pub fn get_all_tags(&self) -> Vec<String> {
        let tags: BTreeSet<String> = self
            .items
            .iter()
            .flat_map(|item| item.tags.iter().cloned())
            .collect();
        tags.into_iter().collect()
    }

    pub fn get_item_count(&self) -> usize {
        self.items.len()
    }

    /// Write the whole index back, via temp file + atomic rename.
    fn persist(&self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = IndexFile { items: self.items.clone() };
        let data = serde_json::to_string_pretty(&file)
            .map_err(|e| AppError::Index(format!("serialize index: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .map_err(|e| AppError::Index(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| AppError::Index(format!("cannot replace {}: {e}", path.display())))
    }
}

fn load_items(path: &Path) -> Result<Vec<IndexedItem>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(path)
        .map_err(|e| AppError::Index(format!("cannot read {}: {e}", path.display())))?;
    let file: IndexFile = serde_json::from_str(&data)
        .map_err(|e| AppError::Index(format!("malformed {}: {e}", path.display())))?;
    Ok(file.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(user_id: &str, prompt: &str) -> IndexMetadata {
        IndexMetadata {
            user_id: user_id.into(),
            prompt: prompt.into(),
            ..IndexMetadata::default()
        }
    }

    fn persistent_index(dir: &Path) -> SemanticIndex {
        let config = EmbeddingConfig {
            provider: "hash".into(),
            api_base_url: "http://localhost:0/v1/embeddings".into(),
            model: "test".into(),
            dimension: 64,
            timeout_seconds: 1,
        };
        SemanticIndex::open(&config, dir, None)
    }

    #[test]
    fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(32);
        let a = e.embed("a red fox in the forest");
        let b = e.embed("a red fox in the forest");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_bounds() {
        let v = vec![1.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn add_and_search_ranks_closer_text_higher() {
        let mut index = SemanticIndex::in_memory(64);
        index.add_item("a", "a red fox in the forest", meta("u", "fox"), vec![]).unwrap();
        index.add_item("b", "a spaceship over a city", meta("u", "ship"), vec![]).unwrap();

        let hits = index.search_by_text("red fox forest", 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].similarity.unwrap() > hits[1].similarity.unwrap());
        // similarity = 1 - distance/2 lives in [0, 1]
        for hit in &hits {
            let s = hit.similarity.unwrap();
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn search_respects_k() {
        let mut index = SemanticIndex::in_memory(64);
        for i in 0..5 {
            index.add_item(&format!("id{i}"), &format!("text {i}"), meta("u", "p"), vec![]).unwrap();
        }
        assert_eq!(index.search_by_text("text", 3, None).unwrap().len(), 3);
    }

    #[test]
    fn text_search_with_tag_filter() {
        let mut index = SemanticIndex::in_memory(64);
        index.add_item("a", "a red fox", meta("u", "p"), vec!["animal".into()]).unwrap();
        index.add_item("b", "a red car", meta("u", "p"), vec!["vehicle".into()]).unwrap();

        let hits = index
            .search_by_text("red", 10, Some(&["vehicle".to_string()]))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn tag_search_is_or_semantics_without_similarity() {
        let mut index = SemanticIndex::in_memory(64);
        index.add_item("a", "x", meta("u", "p"), vec!["animal".into()]).unwrap();
        index.add_item("b", "y", meta("u", "p"), vec!["vehicle".into()]).unwrap();
        index.add_item("c", "z", meta("u", "p"), vec!["food".into()]).unwrap();

        let hits = index.search_by_tags(&["animal".into(), "vehicle".into()], 10);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.similarity.is_none()));
    }

    #[test]
    fn readd_replaces_item() {
        let mut index = SemanticIndex::in_memory(64);
        index.add_item("a", "first", meta("u", "p"), vec![]).unwrap();
        index.add_item("a", "second", meta("u", "p"), vec![]).unwrap();
        assert_eq!(index.get_item_count(), 1);
    }

    #[test]
    fn update_and_delete_roundtrip() {
        let mut index = SemanticIndex::in_memory(64);
        index.add_item("a", "x", meta("u", "p"), vec!["old".into()]).unwrap();

        assert!(index.update_item_tags("a", &["new".to_string()]).unwrap());
        assert_eq!(index.get_all_tags(), vec!["new".to_string()]);
        assert!(!index.update_item_tags("missing", &[]).unwrap());

        assert!(index.delete_item("a").unwrap());
        assert!(!index.delete_item("a").unwrap());
        assert_eq!(index.get_item_count(), 0);
    }

    #[test]
    fn persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        {
            let mut index = persistent_index(tmp.path());
            assert!(!index.is_ephemeral());
            index.add_item("a", "a red fox", meta("u", "p"), vec!["animal".into()]).unwrap();
        }
        let index = persistent_index(tmp.path());
        assert_eq!(index.get_item_count(), 1);
        assert_eq!(index.get_all_tags(), vec!["animal".to_string()]);
    }

    #[test]
    fn corrupt_file_degrades_to_in_memory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILENAME), "not json").unwrap();
        let index = persistent_index(tmp.path());
        assert!(index.is_ephemeral());
        assert_eq!(index.get_item_count(), 0);
    }

    #[test]
    fn unknown_provider_degrades_to_in_memory() {
        let tmp = TempDir::new().unwrap();
        let config = EmbeddingConfig {
            provider: "nope".into(),
            api_base_url: String::new(),
            model: String::new(),
            dimension: 16,
            timeout_seconds: 1,
        };
        let mut index = SemanticIndex::open(&config, tmp.path(), None);
        assert!(index.is_ephemeral());
        // Contract unchanged in degraded mode.
        index.add_item("a", "text", meta("u", "p"), vec![]).unwrap();
        assert_eq!(index.search_by_text("text", 5, None).unwrap().len(), 1);
    }
}
