//! Embedder and reranker capabilities (spec.md §4.4): HTTP adapters over
//! `reqwest`, since the spec treats both providers as external
//! collaborators rather than in-process models.

pub mod embedder;
pub mod reranker;

pub use embedder::{Embedder, HttpEmbedder};
pub use reranker::{HttpReranker, Reranker};
