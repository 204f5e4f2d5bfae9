use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Tokens within this window of expiry are refreshed rather than reused.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Deserialize)]
struct IamTokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    fetched: Instant,
    ttl: Duration,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        let margin = Duration::from_secs(EXPIRY_MARGIN_SECS);
        self.fetched.elapsed() + margin < self.ttl
    }
}

/// Exchanges an IBM Cloud API key for a short-lived IAM bearer token.
///
/// The token is cached and refreshed shortly before expiry. Shared by the
/// embedding and generation clients so a process performs one exchange per
/// token lifetime rather than one per request.
pub struct IamTokenProvider {
    client: reqwest::Client,
    api_key: String,
    token_url: String,
    cached: RwLock<Option<CachedToken>>,
}

impl IamTokenProvider {
    pub fn new(api_key: &str) -> Result<Self> {
        let token_url =
            std::env::var("IAM_TOKEN_URL").unwrap_or_else(|_| IAM_TOKEN_URL.to_string());

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            api_key: api_key.to_string(),
            token_url,
            cached: RwLock::new(None),
        })
    }

    /// Returns a valid bearer token, fetching a new one if the cached token
    /// is absent or close to expiry.
    pub async fn bearer_token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.is_fresh() {
                    return Ok(token.token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.is_fresh() {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        tracing::debug!("Requesting IAM access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("IAM token request failed")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "IAM token exchange failed: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        let body: IamTokenResponse = response
            .json()
            .await
            .context("IAM token response was not valid JSON")?;

        tracing::debug!("IAM token obtained, expires in {}s", body.expires_in);

        Ok(CachedToken {
            token: body.access_token,
            fetched: Instant::now(),
            ttl: Duration::from_secs(body.expires_in),
        })
    }
}
