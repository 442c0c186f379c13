//! Enrichment provider abstraction.
//!
//! `EnrichmentProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Two capabilities are consumed by the pipeline: `expand_prompt` (text in,
//! richer text out) and `analyze_prompt` (text in, [`PromptAnalysis`] out).
//! A failed remote call degrades to the dummy provider's deterministic
//! output instead of failing the pipeline run — enrichment is best-effort.

pub mod providers;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// Structured analysis of a prompt, as produced by the enrichment capability.
///
/// Sentinel values mark absent elements: `subject = "unknown"`,
/// `setting = "unspecified"`, `style = "default"`, `mood = "neutral"`.
/// The tagger folds `subject` and `setting` into the tag set when they are
/// not sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub subject: String,
    pub style: String,
    pub mood: String,
    pub colors: Vec<String>,
    pub setting: String,
}

impl Default for PromptAnalysis {
    fn default() -> Self {
        Self {
            subject: "unknown".into(),
            style: "default".into(),
            mood: "neutral".into(),
            colors: vec!["default".into()],
            setting: "unspecified".into(),
        }
    }
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available enrichment backends.
///
/// Enum dispatch avoids `dyn` trait objects.
/// Adding a backend = new module + new variant + new match arms.
#[derive(Debug, Clone)]
pub enum EnrichmentProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl EnrichmentProvider {
    /// Expand `prompt` into a richer generation prompt.
    ///
    /// A remote provider failure falls back to the dummy expansion (logged),
    /// so this never fails the caller.
    pub fn expand_prompt(&self, prompt: &str) -> String {
        match self {
            EnrichmentProvider::Dummy(p) => p.expand_prompt(prompt),
            EnrichmentProvider::OpenAiCompatible(p) => match p.expand_prompt(prompt) {
                Ok(expanded) => expanded,
                Err(e) => {
                    warn!(error = %e, "prompt expansion failed, using fallback");
                    providers::dummy::DummyProvider.expand_prompt(prompt)
                }
            },
        }
    }

    /// Extract a structured [`PromptAnalysis`] from `prompt`.
    ///
    /// Falls back to the dummy analysis on remote failure, same as
    /// [`expand_prompt`](Self::expand_prompt).
    pub fn analyze_prompt(&self, prompt: &str) -> PromptAnalysis {
        match self {
            EnrichmentProvider::Dummy(p) => p.analyze_prompt(prompt),
            EnrichmentProvider::OpenAiCompatible(p) => match p.analyze_prompt(prompt) {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!(error = %e, "prompt analysis failed, using fallback");
                    providers::dummy::DummyProvider.analyze_prompt(prompt)
                }
            },
        }
    }
}
