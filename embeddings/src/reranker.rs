//! Cross-encoder reranker capability (spec.md §4.4, §4.5): given a query
//! and candidate documents, returns `(original_index, relevance_score)`
//! ordered highest-first, length <= `top_k`.

use async_trait::async_trait;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String], top_k: usize) -> Result<Vec<(usize, f32)>, Error>;
}

pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpReranker {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout_standard)
            .build()
            .expect("failed to build reranker http client");
        Self {
            client,
            base_url: config.reranker_api_base_url.clone(),
            api_key: config.reranker_api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
struct RerankResponseItem {
    index: usize,
    relevance_score: f32,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResponseItem>,
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_k: usize) -> Result<Vec<(usize, f32)>, Error> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let client = &self.client;
        let base_url = &self.base_url;
        let api_key = &self.api_key;
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));

        let response: RerankResponse = retry_with_backoff(policy, || async {
            let resp = client
                .post(format!("{base_url}/rerank"))
                .bearer_auth(api_key)
                .json(&serde_json::json!({
                    "query": query,
                    "documents": documents,
                    "top_n": top_k,
                }))
                .send()
                .await?;
            let resp = resp.error_for_status()?;
            Ok(resp.json().await?)
        })
        .await?;

        let mut results: Vec<(usize, f32)> =
            response.results.into_iter().map(|r| (r.index, r.relevance_score)).collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Stub reranker that scores each document by its overlap with the
    /// query's word set -- enough to exercise the retriever's reorder path
    /// without a real cross-encoder.
    pub struct MockReranker;

    #[async_trait]
    impl Reranker for MockReranker {
        async fn rerank(&self, query: &str, documents: &[String], top_k: usize) -> Result<Vec<(usize, f32)>, Error> {
            let query_words: std::collections::HashSet<&str> = query.split_whitespace().collect();
            let mut scored: Vec<(usize, f32)> = documents
                .iter()
                .enumerate()
                .map(|(i, doc)| {
                    let overlap = doc.split_whitespace().filter(|w| query_words.contains(w)).count();
                    (i, overlap as f32)
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            scored.truncate(top_k);
            Ok(scored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockReranker;
    use super::*;

    #[tokio::test]
    async fn mock_reranker_orders_by_overlap_and_caps_top_k() {
        let reranker = MockReranker;
        let docs = vec!["cats are great".to_string(), "revenue grew in q4".to_string()];
        let results = reranker.rerank("revenue q4 results", &docs, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }
}
