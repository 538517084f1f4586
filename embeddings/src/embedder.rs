//! Dense embedding capability (spec.md §4.4, §6): `embed` / `embed_batch`,
//! order-preserving even when the provider returns results out of order.
//! Grounded on the `reqwest`-based HTTP adapter shape used throughout this
//! workspace (`ingestion::ocr::HttpOcrProvider`).

use async_trait::async_trait;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::model::EMBEDDING_DIM;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Error>;

    /// Embeds a batch, preserving input order regardless of the order the
    /// provider returns results in.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error>;
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEmbedder {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout_standard)
            .build()
            .expect("failed to build embedder http client");
        Self {
            client,
            base_url: config.embedder_api_base_url.clone(),
            api_key: config.embedder_api_key.clone(),
        }
    }

    fn retry_policy() -> RetryPolicy {
        // 429-aware: the default backoff (base=2s, cap=60s) is generous
        // enough to ride out a rate-limit window without a special case.
        RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[derive(Deserialize)]
struct EmbedResponseItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseItem>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Error> {
        let mut out = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        out.pop().ok_or_else(|| Error::Internal(anyhow::anyhow!("embedder returned no vectors")))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let client = &self.client;
        let base_url = &self.base_url;
        let api_key = &self.api_key;

        let mut response = retry_with_backoff(Self::retry_policy(), || async {
            let resp = client
                .post(format!("{base_url}/embeddings"))
                .bearer_auth(api_key)
                .json(&serde_json::json!({ "input": texts, "dimensions": EMBEDDING_DIM }))
                .send()
                .await?;
            let resp = resp.error_for_status()?;
            let parsed: EmbedResponse = resp.json().await?;
            Ok(parsed)
        })
        .await?;

        // Sort by the provider's returned index so batch order always
        // matches input order, per spec.md §4.4's explicit requirement.
        response.data.sort_by_key(|item| item.index);
        if response.data.len() != texts.len() {
            return Err(Error::Transient(format!(
                "embedder returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }
        Ok(response.data.into_iter().map(|item| item.embedding).collect())
    }
}
