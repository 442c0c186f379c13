//! Generation orchestrator — prompt in, persisted creation out.
//!
//! One `process` call runs the full chain: validate → enrich → image →
//! 3D asset → persist. Each stage merges its partial result into the
//! session cache before the next stage runs, so an interrupted run still
//! leaves an inspectable trail in short-term memory.
//!
//! Every fault from the providers, the remote services or the store is
//! caught at this boundary and converted into a [`PipelineFailure`] that
//! names the failed stage and carries whatever artifacts were already
//! produced. `process` never panics.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{error, info};

use crate::config::Config;
use crate::error::AppError;
use crate::llm::EnrichmentProvider;
use crate::memory::{CreationRecord, MemoryStore, SessionPatch};
use crate::remote::{GenerationRequest, GenerationResponse, GenerationService};

// ── Failure type ──────────────────────────────────────────────────────────────

/// Which stage of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The input prompt was rejected before any work started.
    Validation,
    /// A remote generation capability failed or returned a bad payload.
    RemoteGeneration,
    /// The record could not be written to the durable store.
    Persistence,
    /// Anything else (filesystem faults writing artifacts, etc.).
    Internal,
}

/// Structured failure returned by [`GenerationPipeline::process`].
///
/// Carries the `request_id` once one was assigned, plus any artifact paths
/// produced before the failing stage — a 3D-stage failure still reports the
/// image that was written.
#[derive(Debug)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub message: String,
    pub request_id: Option<String>,
    pub image_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
}

impl PipelineFailure {
    fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            message: message.into(),
            request_id: None,
            image_path: None,
            model_path: None,
        }
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.request_id {
            Some(id) => write!(f, "[{id}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PipelineFailure {}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct GenerationPipeline {
    output_dir: PathBuf,
    text_to_image_app: String,
    image_to_3d_app: String,
    provider: EnrichmentProvider,
    service: Box<dyn GenerationService>,
    memory: MemoryStore,
}

impl GenerationPipeline {
    pub fn new(
        config: &Config,
        provider: EnrichmentProvider,
        service: Box<dyn GenerationService>,
        memory: MemoryStore,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(&config.output_dir).map_err(|e| {
            AppError::Config(format!("cannot create {}: {e}", config.output_dir.display()))
        })?;
        Ok(Self {
            output_dir: config.output_dir.clone(),
            text_to_image_app: config.generation.text_to_image_app.clone(),
            image_to_3d_app: config.generation.image_to_3d_app.clone(),
            provider,
            service,
            memory,
        })
    }

    /// Run the full generation chain for `prompt` on behalf of `user_id`.
    ///
    /// On success the returned record is already enriched and persisted.
    pub fn process(
        &mut self,
        prompt: &str,
        user_id: &str,
    ) -> Result<CreationRecord, PipelineFailure> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            error!(%user_id, "rejected empty prompt");
            return Err(PipelineFailure::validation("prompt is empty"));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(%request_id, %user_id, %prompt, "pipeline started");

        // Stage 1: enrichment. The provider degrades internally on HTTP
        // faults, so these calls are infallible.
        let expanded_prompt = self.provider.expand_prompt(prompt);
        let analysis = self.provider.analyze_prompt(prompt);
        info!(%request_id, %expanded_prompt, "prompt expanded");
        self.memory.store_short_term(user_id, SessionPatch {
            request_id: Some(request_id.clone()),
            prompt: Some(prompt.to_string()),
            expanded_prompt: Some(expanded_prompt.clone()),
            analysis: Some(analysis.clone()),
            ..SessionPatch::default()
        });

        // Stage 2: image synthesis.
        let image_data = match self.service.call(
            &self.text_to_image_app,
            &GenerationRequest::TextToImage { prompt: expanded_prompt.clone() },
            user_id,
        ) {
            Ok(GenerationResponse::Image { data }) => data,
            Ok(_) => {
                return Err(self.stage_failure(
                    FailureKind::RemoteGeneration,
                    &request_id,
                    "image service returned a non-image payload",
                    None,
                ));
            }
            Err(e) => {
                return Err(self.stage_failure(
                    FailureKind::RemoteGeneration,
                    &request_id,
                    format!("image generation failed: {e}"),
                    None,
                ));
            }
        };

        let image_path = self.output_dir.join(format!("{request_id}_image.png"));
        if let Err(e) = fs::write(&image_path, &image_data) {
            return Err(self.stage_failure(
                FailureKind::Internal,
                &request_id,
                format!("cannot write {}: {e}", image_path.display()),
                None,
            ));
        }
        info!(%request_id, path = %image_path.display(), bytes = image_data.len(), "image written");
        self.memory.store_short_term(user_id, SessionPatch {
            image_path: Some(image_path.clone()),
            ..SessionPatch::default()
        });

        // Stage 3: 3D synthesis from the image bytes.
        let (model_data, format) = match self.service.call(
            &self.image_to_3d_app,
            &GenerationRequest::ImageToModel { image_base64: BASE64.encode(&image_data) },
            user_id,
        ) {
            Ok(GenerationResponse::Model { data, format }) => (data, format),
            Ok(_) => {
                return Err(self.stage_failure(
                    FailureKind::RemoteGeneration,
                    &request_id,
                    "3d service returned a non-asset payload",
                    Some(image_path),
                ));
            }
            Err(e) => {
                return Err(self.stage_failure(
                    FailureKind::RemoteGeneration,
                    &request_id,
                    format!("3d generation failed: {e}"),
                    Some(image_path),
                ));
            }
        };

        let model_path =
            self.output_dir.join(format!("{request_id}_model.{}", format.extension()));
        if let Err(e) = fs::write(&model_path, &model_data) {
            return Err(self.stage_failure(
                FailureKind::Internal,
                &request_id,
                format!("cannot write {}: {e}", model_path.display()),
                Some(image_path),
            ));
        }
        info!(%request_id, path = %model_path.display(), bytes = model_data.len(), "3d asset written");
        self.memory.store_short_term(user_id, SessionPatch {
            model_path: Some(model_path.clone()),
            ..SessionPatch::default()
        });

        // Stage 4: persist. The store assigns tags and categories.
        let mut record = CreationRecord::new(prompt);
        record.request_id = request_id.clone();
        record.expanded_prompt = expanded_prompt;
        record.analysis = analysis;
        record.image_path = Some(image_path.clone());
        record.model_path = Some(model_path.clone());
        record.processing_time = started.elapsed().as_secs_f64();

        let record = match self.memory.store_long_term(user_id, record) {
            Ok(record) => record,
            Err(e) => {
                return Err(PipelineFailure {
                    kind: FailureKind::Persistence,
                    message: format!("cannot persist record: {e}"),
                    request_id: Some(request_id),
                    image_path: Some(image_path),
                    model_path: Some(model_path),
                });
            }
        };

        info!(%request_id, elapsed = record.processing_time, "pipeline finished");
        Ok(record)
    }

    /// The user's most recent creations, newest first.
    pub fn recent_creations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CreationRecord>, AppError> {
        self.memory.retrieve_long_term(user_id, Some(limit))
    }

    /// Free-text search over the user's past creations.
    pub fn search_creations(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<CreationRecord>, AppError> {
        self.memory.search_memory(user_id, query)
    }

    /// Shared access to the memory subsystem for callers that need more than
    /// the pass-through helpers.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn stage_failure(
        &self,
        kind: FailureKind,
        request_id: &str,
        message: impl Into<String>,
        image_path: Option<PathBuf>,
    ) -> PipelineFailure {
        let message = message.into();
        error!(%request_id, %message, "pipeline stage failed");
        PipelineFailure {
            kind,
            message,
            request_id: Some(request_id.to_string()),
            image_path,
            model_path: None,
        }
    }
}
