use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::embeddings::API_VERSION;
use crate::iam::IamTokenProvider;

pub const DEFAULT_GENERATION_MODEL: &str = "ibm/granite-3-2-8b-instruct";

/// Per-request deadline for the generation endpoint.
const GENERATION_TIMEOUT_SECS: u64 = 120;

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model_id: &'a str,
    project_id: &'a str,
    input: &'a str,
    parameters: &'a GenerationParams,
}

/// Decoding parameters sent with every generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationParams {
    pub decoding_method: String,
    pub min_new_tokens: u32,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            decoding_method: "greedy".to_string(),
            min_new_tokens: 3,
            max_new_tokens: 512,
            temperature: 0.1,
            repetition_penalty: 1.05,
        }
    }
}

#[derive(Deserialize)]
struct GenerationResponse {
    results: Vec<GenerationResult>,
}

#[derive(Deserialize)]
struct GenerationResult {
    generated_text: String,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Generation client for the watsonx.ai text-generation endpoint.
/// Decoding parameters are fixed at construction time.
pub struct GenerationService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    project_id: String,
    params: GenerationParams,
    iam: Arc<IamTokenProvider>,
}

impl GenerationService {
    pub fn new(service_url: &str, project_id: &str, iam: Arc<IamTokenProvider>) -> Result<Self> {
        let model = std::env::var("WATSONX_GENERATION_MODEL")
            .unwrap_or_else(|_| DEFAULT_GENERATION_MODEL.to_string());

        tracing::info!("Generation endpoint: {}/ml/v1/text/generation", service_url);
        tracing::info!("Generation model: {}", model);

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
                .build()?,
            endpoint: format!("{service_url}/ml/v1/text/generation"),
            model,
            project_id: project_id.to_string(),
            params: GenerationParams::default(),
            iam,
        })
    }

    /// Generate a completion for the given prompt.
    ///
    /// Returns the generated text, or an error distinguishing timeouts from
    /// other failures via `reqwest::Error::is_timeout` on the source chain.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let token = self.iam.bearer_token().await?;
        let request = GenerationRequest {
            model_id: &self.model,
            project_id: &self.project_id,
            input: prompt,
            parameters: &self.params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("version", API_VERSION)])
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .context("Generation request failed")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "watsonx generation API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let body: GenerationResponse = response
            .json()
            .await
            .context("Generation response was not valid JSON")?;

        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty results array from watsonx generation"))?;

        if let Some(reason) = result.stop_reason.as_deref() {
            tracing::debug!("Generation stop reason: {}", reason);
        }

        Ok(result.generated_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_match_fixed_decoding_settings() {
        let params = GenerationParams::default();
        assert_eq!(params.decoding_method, "greedy");
        assert_eq!(params.min_new_tokens, 3);
        assert_eq!(params.max_new_tokens, 512);
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
        assert!((params.repetition_penalty - 1.05).abs() < f32::EPSILON);
    }

    #[test]
    fn generation_request_serializes_parameters_block() {
        let params = GenerationParams::default();
        let request = GenerationRequest {
            model_id: "ibm/granite-3-2-8b-instruct",
            project_id: "proj-123",
            input: "Question: what?",
            parameters: &params,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model_id"], "ibm/granite-3-2-8b-instruct");
        assert_eq!(value["parameters"]["decoding_method"], "greedy");
        assert_eq!(value["parameters"]["max_new_tokens"], 512);
    }

    #[test]
    fn generation_response_parses_generated_text() {
        let body = r#"{
            "model_id": "ibm/granite-3-2-8b-instruct",
            "results": [
                {"generated_text": "Revenue grew.", "generated_token_count": 3, "stop_reason": "eos_token"}
            ]
        }"#;

        let parsed: GenerationResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results[0].generated_text, "Revenue grew.");
        assert_eq!(parsed.results[0].stop_reason.as_deref(), Some("eos_token"));
    }
}
