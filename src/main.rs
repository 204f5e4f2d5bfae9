use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod analyst;
mod config;
mod embeddings;
mod generation;
mod iam;
mod ingest;
mod server;
mod store;

use analyst::Analyst;
use config::Config;
use embeddings::EmbeddingService;
use generation::GenerationService;
use iam::IamTokenProvider;
use server::AppState;
use store::VectorStore;

fn setup_logging() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let is_development = std::env::var("DEVELOPMENT").is_ok() || std::env::var("DEV").is_ok();

    if is_development {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    setup_logging();

    // Credentials are validated before any client or store is constructed.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Error loading credentials: {e:#}");
            std::process::exit(1);
        }
    };
    config.log_summary();
    tracing::info!("Credentials loaded successfully.");

    let iam = Arc::new(IamTokenProvider::new(&config.api_key)?);
    let embeddings = Arc::new(EmbeddingService::new(
        &config.service_url,
        &config.project_id,
        iam.clone(),
    )?);
    let generation = Arc::new(GenerationService::new(
        &config.service_url,
        &config.project_id,
        iam,
    )?);

    let store = Arc::new(VectorStore::build_or_load(&config, embeddings).await?);
    tracing::info!("Vector store ready with {} chunks", store.chunk_count());

    let analyst = Analyst::new(store, generation, config.top_k);
    let state = Arc::new(AppState { analyst });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Serving web form on http://{}", listener.local_addr()?);
    axum::serve(listener, server::app(state)).await?;

    Ok(())
}
