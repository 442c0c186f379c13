//! End-to-end orchestrator tests with a scripted generation service.
//!
//! Run with:
//!   cargo test --test test_pipeline

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tempfile::TempDir;

use atelier::config::{
    Config, EmbeddingConfig, GenerationConfig, LlmConfig, MemoryConfig, OpenAiConfig,
};
use atelier::error::AppError;
use atelier::llm::EnrichmentProvider;
use atelier::llm::providers::dummy::DummyProvider;
use atelier::memory::{MemoryStore, SemanticIndex};
use atelier::pipeline::{FailureKind, GenerationPipeline};
use atelier::remote::{
    GenerationRequest, GenerationResponse, GenerationService, ModelFormat,
};

// ── helpers ──────────────────────────────────────────────────────────────────

/// Replays a fixed sequence of responses and records every call it receives.
struct ScriptedService {
    responses: Mutex<VecDeque<Result<GenerationResponse, AppError>>>,
    calls: Mutex<Vec<(String, GenerationRequest)>>,
}

impl ScriptedService {
    fn new(responses: Vec<Result<GenerationResponse, AppError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl GenerationService for ScriptedService {
    fn call(
        &self,
        capability_id: &str,
        request: &GenerationRequest,
        _user_id: &str,
    ) -> Result<GenerationResponse, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((capability_id.to_string(), request.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Remote("script exhausted".into())))
    }
}

fn test_config(root: &Path) -> Config {
    Config {
        data_dir: root.join("datastore"),
        output_dir: root.join("output"),
        log_level: "info".into(),
        llm: LlmConfig {
            provider: "dummy".into(),
            openai: OpenAiConfig {
                api_base_url: "http://localhost:0/v1/chat/completions".into(),
                model: "test-model".into(),
                temperature: 0.0,
                timeout_seconds: 1,
            },
        },
        llm_api_key: None,
        embedding: EmbeddingConfig {
            provider: "hash".into(),
            api_base_url: "http://localhost:0/v1/embeddings".into(),
            model: "test-embed".into(),
            dimension: 64,
            timeout_seconds: 1,
        },
        generation: GenerationConfig {
            text_to_image_app: "img-app".into(),
            image_to_3d_app: "model-app".into(),
            network_suffix: "test.invalid".into(),
            timeout_seconds: 1,
        },
        memory: MemoryConfig { fallback_matches_tags: false },
    }
}

fn build_pipeline(
    tmp: &TempDir,
    responses: Vec<Result<GenerationResponse, AppError>>,
) -> GenerationPipeline {
    let config = test_config(tmp.path());
    let memory = MemoryStore::with_index(
        config.data_dir.join("memory.json"),
        SemanticIndex::in_memory(64),
        false,
    )
    .unwrap();
    GenerationPipeline::new(
        &config,
        EnrichmentProvider::Dummy(DummyProvider),
        Box::new(ScriptedService::new(responses)),
        memory,
    )
    .unwrap()
}

fn image_ok(data: &[u8]) -> Result<GenerationResponse, AppError> {
    Ok(GenerationResponse::Image { data: data.to_vec() })
}

fn model_ok(data: &[u8], format: ModelFormat) -> Result<GenerationResponse, AppError> {
    Ok(GenerationResponse::Model { data: data.to_vec(), format })
}

fn output_files(tmp: &TempDir) -> Vec<String> {
    fs::read_dir(tmp.path().join("output"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

// ── validation ────────────────────────────────────────────────────────────────

#[test]
fn empty_prompt_rejected_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = build_pipeline(&tmp, vec![]);

    let failure = pipeline.process("   ", "u").unwrap_err();
    assert_eq!(failure.kind, FailureKind::Validation);
    assert!(failure.request_id.is_none());
    assert!(failure.image_path.is_none());

    // No remote calls, no artifacts, no records.
    assert!(output_files(&tmp).is_empty());
    assert!(pipeline.recent_creations("u", 10).unwrap().is_empty());
}

// ── happy path ────────────────────────────────────────────────────────────────

#[test]
fn successful_run_writes_artifacts_and_persists_record() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = build_pipeline(&tmp, vec![
        image_ok(b"png-bytes"),
        model_ok(b"glb-bytes", ModelFormat::Glb),
    ]);

    let record = pipeline.process("a dragon beside a castle", "u").unwrap();

    assert!(!record.request_id.is_empty());
    assert_eq!(record.prompt, "a dragon beside a castle");
    assert!(record.expanded_prompt.contains("dramatic lighting"));
    assert!(record.processing_time >= 0.0);
    assert!(!record.timestamp.is_empty());

    // The store enriched the record on the way in.
    assert_eq!(record.primary_category, "fantasy");
    assert!(record.tags.contains(&"fantasy".to_string()));

    // Artifacts named after the request id, with the right bytes.
    let image_path = record.image_path.as_ref().unwrap();
    let model_path = record.model_path.as_ref().unwrap();
    assert!(image_path.ends_with(format!("{}_image.png", record.request_id)));
    assert!(model_path.ends_with(format!("{}_model.glb", record.request_id)));
    assert_eq!(fs::read(image_path).unwrap(), b"png-bytes");
    assert_eq!(fs::read(model_path).unwrap(), b"glb-bytes");

    // Persisted and retrievable.
    let recent = pipeline.recent_creations("u", 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].request_id, record.request_id);
}

#[test]
fn second_stage_receives_image_bytes_base64() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let memory = MemoryStore::with_index(
        config.data_dir.join("memory.json"),
        SemanticIndex::in_memory(64),
        false,
    )
    .unwrap();
    // The pipeline owns its service box, so the call log is reached through
    // a shared handle.
    let service = Arc::new(ScriptedService::new(vec![
        image_ok(b"png-bytes"),
        model_ok(b"glb-bytes", ModelFormat::Glb),
    ]));

    let mut pipeline = GenerationPipeline::new(
        &config,
        EnrichmentProvider::Dummy(DummyProvider),
        Box::new(SharedService(Arc::clone(&service))),
        memory,
    )
    .unwrap();

    pipeline.process("a fox", "u").unwrap();

    let calls = service.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "img-app");
    match &calls[0].1 {
        GenerationRequest::TextToImage { prompt } => {
            assert!(prompt.starts_with("a fox"));
            assert!(prompt.contains("dramatic lighting"));
        }
        other => panic!("unexpected first request: {other:?}"),
    }
    assert_eq!(calls[1].0, "model-app");
    match &calls[1].1 {
        GenerationRequest::ImageToModel { image_base64 } => {
            assert_eq!(image_base64, &BASE64.encode(b"png-bytes"));
        }
        other => panic!("unexpected second request: {other:?}"),
    }
}

/// Forwarding wrapper so the test can keep a handle on the scripted service
/// after handing ownership of the `dyn` box to the pipeline.
struct SharedService(Arc<ScriptedService>);

impl GenerationService for SharedService {
    fn call(
        &self,
        capability_id: &str,
        request: &GenerationRequest,
        user_id: &str,
    ) -> Result<GenerationResponse, AppError> {
        self.0.call(capability_id, request, user_id)
    }
}

#[test]
fn video_fallback_writes_mp4() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = build_pipeline(&tmp, vec![
        image_ok(b"png-bytes"),
        model_ok(b"mp4-bytes", ModelFormat::Mp4),
    ]);

    let record = pipeline.process("a fox", "u").unwrap();
    let model_path = record.model_path.as_ref().unwrap();
    assert!(model_path.extension().is_some_and(|e| e == "mp4"));
    assert_eq!(fs::read(model_path).unwrap(), b"mp4-bytes");
}

// ── partial failure ───────────────────────────────────────────────────────────

#[test]
fn image_failure_carries_request_id_and_persists_nothing() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline =
        build_pipeline(&tmp, vec![Err(AppError::Remote("HTTP 503".into()))]);

    let failure = pipeline.process("a fox", "u").unwrap_err();
    assert_eq!(failure.kind, FailureKind::RemoteGeneration);
    assert!(failure.request_id.is_some());
    assert!(failure.image_path.is_none());
    assert!(failure.model_path.is_none());

    assert!(output_files(&tmp).is_empty());
    assert!(pipeline.recent_creations("u", 10).unwrap().is_empty());

    // The session cache still holds the enrichment trail.
    let session = pipeline.memory().retrieve_short_term("u");
    assert_eq!(session.request_id, failure.request_id);
    assert_eq!(session.prompt.as_deref(), Some("a fox"));
    assert!(session.expanded_prompt.is_some());
    assert!(session.image_path.is_none());
}

#[test]
fn model_failure_preserves_image_artifact() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = build_pipeline(&tmp, vec![
        image_ok(b"png-bytes"),
        Err(AppError::Remote("missing generated_object and video_object".into())),
    ]);

    let failure = pipeline.process("a fox", "u").unwrap_err();
    assert_eq!(failure.kind, FailureKind::RemoteGeneration);

    // The image survives and is reported; the record does not exist.
    let image_path = failure.image_path.as_ref().unwrap();
    assert!(image_path.exists());
    assert_eq!(fs::read(image_path).unwrap(), b"png-bytes");
    assert!(failure.model_path.is_none());
    assert!(pipeline.recent_creations("u", 10).unwrap().is_empty());

    let files = output_files(&tmp);
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_image.png"));
}

// ── retrieval pass-throughs ───────────────────────────────────────────────────

#[test]
fn recent_and_search_reach_the_store() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = build_pipeline(&tmp, vec![
        image_ok(b"a"),
        model_ok(b"b", ModelFormat::Glb),
        image_ok(b"c"),
        model_ok(b"d", ModelFormat::Glb),
    ]);

    pipeline.process("a red dragon", "u").unwrap();
    pipeline.process("a bowl of ramen", "u").unwrap();

    assert_eq!(pipeline.recent_creations("u", 10).unwrap().len(), 2);
    assert_eq!(pipeline.recent_creations("u", 1).unwrap().len(), 1);

    let hits = pipeline.search_creations("u", "red dragon").unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].similarity_score.is_some());

    // Other users see nothing.
    assert!(pipeline.recent_creations("someone-else", 10).unwrap().is_empty());
}
