use anyhow::{Context, Result};
use std::net::SocketAddr;

/// Service configuration loaded from environment variables.
///
/// Built once at process entry and passed by reference into the components
/// that need it. Credentials are required; everything else has a default.
#[derive(Debug, Clone)]
pub struct Config {
    /// IBM Cloud API key used for the IAM token exchange
    pub api_key: String,

    /// watsonx.ai project id scoping all model calls
    pub project_id: String,

    /// watsonx.ai regional endpoint
    pub service_url: String,

    /// Path to the source PDF document
    pub pdf_path: String,

    /// Directory holding the persisted vector store
    pub store_dir: String,

    /// Number of chunks retrieved per question
    pub top_k: usize,

    /// Address the web form binds to
    pub bind_addr: SocketAddr,
}

pub const DEFAULT_SERVICE_URL: &str = "https://us-south.ml.cloud.ibm.com";
pub const DEFAULT_PDF_PATH: &str = "ibm-annual-report-2024.pdf";
pub const DEFAULT_STORE_DIR: &str = "./vector_store";
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Fails if `WATSONX_APIKEY` or `WATSONX_PROJECT_ID` is missing or empty,
    /// so no model client or store is ever constructed without credentials.
    pub fn from_env() -> Result<Self> {
        let api_key = require_env("WATSONX_APIKEY")?;
        let project_id = require_env("WATSONX_PROJECT_ID")?;
        let service_url = std::env::var("WATSONX_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());

        let pdf_path = std::env::var("ANALYST_PDF_PATH")
            .unwrap_or_else(|_| DEFAULT_PDF_PATH.to_string());
        let store_dir = std::env::var("ANALYST_STORE_DIR")
            .unwrap_or_else(|_| DEFAULT_STORE_DIR.to_string());
        let top_k = std::env::var("ANALYST_TOP_K")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&k| k > 0)
            .unwrap_or(DEFAULT_TOP_K);
        let bind_addr = std::env::var("ANALYST_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("ANALYST_BIND_ADDR is not a valid socket address")?;

        Ok(Self {
            api_key,
            project_id,
            service_url: service_url.trim_end_matches('/').to_string(),
            pdf_path,
            store_dir,
            top_k,
            bind_addr,
        })
    }

    /// Log the diagnostic values the operator needs to confirm a deployment.
    /// The key itself is never logged, only its presence.
    pub fn log_summary(&self) {
        tracing::info!("WATSONX_APIKEY found: {}", !self.api_key.is_empty());
        tracing::info!("WATSONX_URL: {}", self.service_url);
        tracing::info!("WATSONX_PROJECT_ID: {}", self.project_id);
        tracing::info!("PDF path: {}", self.pdf_path);
        tracing::info!("Store directory: {}", self.store_dir);
        tracing::info!("Retrieval top_k: {}", self.top_k);
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{name} not found in environment variables"))
}
