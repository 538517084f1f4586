//! OCR capability: PDF bytes in, per-page Markdown out. Consumed by the
//! PDF extractor; implemented by an HTTP adapter talking to an external
//! OCR provider (spec.md §6's OCR capability).

use async_trait::async_trait;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrPage {
    pub markdown: String,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn ocr(&self, pdf_bytes: &[u8]) -> Result<Vec<OcrPage>, Error>;
}

pub struct HttpOcrProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpOcrProvider {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout_ocr)
            .build()
            .expect("failed to build OCR http client");
        Self {
            client,
            base_url: config.ocr_api_base_url.clone(),
            api_key: config.ocr_api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<OcrResponsePage>,
}

#[derive(Deserialize)]
struct OcrResponsePage {
    markdown: String,
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn ocr(&self, pdf_bytes: &[u8]) -> Result<Vec<OcrPage>, Error> {
        let document_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, pdf_bytes);
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30));
        let base_url = &self.base_url;
        let api_key = &self.api_key;
        let client = &self.client;

        retry_with_backoff(policy, || async {
            let resp = client
                .post(format!("{base_url}/ocr"))
                .bearer_auth(api_key)
                .json(&serde_json::json!({
                    "model": "ocr-latest",
                    "document": { "type": "document_b64", "data": document_b64 },
                }))
                .send()
                .await?;
            let resp = resp.error_for_status()?;
            let parsed: OcrResponse = resp.json().await?;
            Ok(parsed
                .pages
                .into_iter()
                .map(|p| OcrPage { markdown: p.markdown })
                .collect())
        })
        .await
    }
}
