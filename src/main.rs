//! Atelier — creative generation pipeline CLI.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Init logger at default level
//!   3. Load config
//!   4. Re-init logger at configured level
//!   5. Build providers, services and the memory store
//!   6. Run the requested command
//!
//! Usage:
//!   atelier <prompt...>          run the full generation pipeline
//!   atelier --recent [N]         list the N most recent creations (default 5)
//!   atelier --search <query...>  search past creations

use std::env;

use tracing::info;

use atelier::config;
use atelier::error::AppError;
use atelier::llm;
use atelier::logger;
use atelier::memory::{CreationRecord, MemoryStore};
use atelier::pipeline::GenerationPipeline;
use atelier::remote::HttpGenerationService;

const DEFAULT_USER: &str = "local";
const DEFAULT_RECENT_LIMIT: usize = 5;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    // Bootstrap logger at "info" before config is available.
    logger::init("info")?;

    let config = config::load()?;
    logger::init(&config.log_level)?;

    info!(
        data_dir = %config.data_dir.display(),
        output_dir = %config.output_dir.display(),
        llm_provider = %config.llm.provider,
        embedding_provider = %config.embedding.provider,
        "config loaded"
    );

    let provider = llm::providers::build(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Provider(e.to_string()))?;
    let service = HttpGenerationService::new(
        config.generation.network_suffix.clone(),
        config.generation.timeout_seconds,
    )?;
    let memory = MemoryStore::open(
        &config.data_dir,
        &config.memory,
        &config.embedding,
        config.llm_api_key.clone(),
    )?;
    let mut pipeline =
        GenerationPipeline::new(&config, provider, Box::new(service), memory)?;

    let args: Vec<String> = env::args().skip(1).collect();
    match args.split_first() {
        Some((flag, rest)) if flag == "--recent" => {
            let limit = rest
                .first()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECENT_LIMIT);
            let records = pipeline.recent_creations(DEFAULT_USER, limit)?;
            print_records(&records)?;
        }
        Some((flag, rest)) if flag == "--search" => {
            let query = rest.join(" ");
            if query.trim().is_empty() {
                return Err(AppError::Config("--search requires a query".into()));
            }
            let records = pipeline.search_creations(DEFAULT_USER, &query)?;
            print_records(&records)?;
        }
        Some(_) => {
            let prompt = args.join(" ");
            match pipeline.process(&prompt, DEFAULT_USER) {
                Ok(record) => print_records(std::slice::from_ref(&record))?,
                Err(failure) => {
                    eprintln!("generation failed: {failure}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            eprintln!("usage: atelier <prompt> | --recent [N] | --search <query>");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn print_records(records: &[CreationRecord]) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| AppError::Memory(format!("serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}
