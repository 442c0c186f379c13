//! Dummy enrichment provider — deterministic, offline.
//!
//! Doubles as the degradation target: the HTTP provider falls back to these
//! functions when a remote call fails, so the pipeline always has an
//! expansion and an analysis to work with.

use crate::llm::PromptAnalysis;

/// Suffix appended to every prompt by the fallback expansion.
const EXPANSION_SUFFIX: &str = ", with dramatic lighting, vibrant colors, detailed textures, \
4K resolution, professional photography, trending on artstation";

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    /// Deterministic expansion: original prompt plus a fixed quality suffix.
    pub fn expand_prompt(&self, prompt: &str) -> String {
        format!("{prompt}{EXPANSION_SUFFIX}")
    }

    /// Naive analysis: the first word becomes the subject, everything else
    /// stays at its sentinel value.
    pub fn analyze_prompt(&self, prompt: &str) -> PromptAnalysis {
        PromptAnalysis {
            subject: prompt
                .split_whitespace()
                .next()
                .unwrap_or("unknown")
                .to_string(),
            ..PromptAnalysis::default()
        }
    }
}
