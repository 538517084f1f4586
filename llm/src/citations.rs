//! Citation extraction from a final assistant answer (spec.md §4.6,
//! §8 property 9): match `\[(\d+)\]` globally, map each distinct in-range
//! number to the corresponding tool-observed chunk.

use drivescout_core::model::Citation;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// A chunk surfaced by an agent tool call, in first-seen order. Index `n`
/// (1-based) in the final text maps to `indexed_chunks[n-1]`.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_id: uuid::Uuid,
    pub file_name: String,
    pub location: String,
    pub excerpt: String,
    pub source_url: String,
}

fn citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

/// Returns the distinct citation numbers referenced in `text`, in
/// ascending order.
pub fn referenced_numbers(text: &str) -> BTreeSet<usize> {
    citation_regex()
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect()
}

/// Builds the `citations` map for an assistant answer: every distinct
/// number `n` appearing as `[n]` with `1 <= n <= indexed_chunks.len()`
/// maps to `indexed_chunks[n-1]`, keyed by its stringified number.
pub fn extract_citations(text: &str, indexed_chunks: &[IndexedChunk]) -> HashMap<String, Citation> {
    referenced_numbers(text)
        .into_iter()
        .filter(|n| *n >= 1 && *n <= indexed_chunks.len())
        .map(|n| {
            let chunk = &indexed_chunks[n - 1];
            (
                n.to_string(),
                Citation {
                    chunk_id: chunk.chunk_id,
                    file_name: chunk.file_name.clone(),
                    location: chunk.location.clone(),
                    excerpt: chunk.excerpt.clone(),
                    source_url: chunk.source_url.clone(),
                },
            )
        })
        .collect()
}
