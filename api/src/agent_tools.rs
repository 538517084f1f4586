//! The API-layer wiring for the agent's three tools (spec.md §4.6) and for
//! turn persistence, named in `SPEC_FULL.md` §4.6 as living "in the API
//! layer" since `llm::agent` only depends on the `AgentTools`/
//! `ConversationSink` traits, not on a concrete store or retriever.

use async_trait::async_trait;
use drivescout_core::error::Error;
use drivescout_core::model::{Citation, MessageRole, MimeClass};
use drivescout_ingestion::drive::DriveClient;
use drivescout_ingestion::extract::{self, VisionProvider};
use drivescout_ingestion::ocr::OcrProvider;
use drivescout_llm::agent::{AgentTools, ConversationSink, FileContent, SearchHit};
use drivescout_storage::session::{resolve_access_token, TokenCrypto};
use drivescout_storage::{ChunkStore, ConversationStore, FileStore, FolderStore, HybridRetriever, RankedChunk, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const SEARCH_TOP_K: i64 = 10;
const EXCERPT_MAX_CHARS: usize = 320;

fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// `https://drive.google.com/file/d/{id}/view`, matching
/// `examples/original_source/backend/app/utils/helpers.py`'s
/// `get_google_drive_url`.
fn drive_view_url(remote_file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{remote_file_id}/view")
}

/// Shared by `search_folder` and the standard-mode chat handler, since
/// both turn a fused/reranked hit list into the same `SearchHit` shape.
pub fn ranked_to_hits(ranked: Vec<RankedChunk>) -> Vec<SearchHit> {
    ranked
        .into_iter()
        .map(|r| SearchHit {
            chunk_id: r.chunk.id,
            file_id: r.chunk.file_id,
            file_name: r.file_name,
            excerpt: truncate_chars(&r.chunk.chunk_text, EXCERPT_MAX_CHARS),
            location: r.chunk.location.render(),
            score: r.combined_score as f32,
            source_url: drive_view_url(&r.remote_file_id),
        })
        .collect()
}

pub struct ApiAgentTools {
    pub folders: Arc<dyn FolderStore>,
    pub files: Arc<dyn FileStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub retriever: Arc<HybridRetriever>,
    pub drive: Arc<dyn DriveClient>,
    pub ocr: Arc<dyn OcrProvider>,
    pub vision: Arc<dyn VisionProvider>,
    pub token_refresher: Arc<dyn drivescout_core::oauth::TokenRefresher>,
    pub token_crypto: Arc<dyn TokenCrypto>,
}

#[async_trait]
impl AgentTools for ApiAgentTools {
    async fn search_folder(&self, folder_id: Uuid, query: &str) -> Result<Vec<SearchHit>, Error> {
        let ranked = self.retriever.search(query, folder_id, SEARCH_TOP_K).await?;
        Ok(ranked_to_hits(ranked))
    }

    async fn get_file_chunks(&self, folder_id: Uuid, file_id: Uuid) -> Result<FileContent, Error> {
        let file = self.files.get_file_in_folder(folder_id, file_id).await?;
        let mut chunks = self.chunks.get_file_chunks(file_id).await?;
        chunks.sort_by_key(|c| c.chunk_index);
        let text = chunks.iter().map(|c| c.chunk_text.as_str()).collect::<Vec<_>>().join("\n\n");
        Ok(FileContent { file_name: file.name, text })
    }

    async fn get_file(&self, folder_id: Uuid, file_id: Uuid) -> Result<FileContent, Error> {
        let file = self.files.get_file_in_folder(folder_id, file_id).await?;
        let folder = self.folders.get_folder(folder_id).await?;
        let access_token =
            resolve_access_token(self.sessions.as_ref(), self.token_refresher.as_ref(), self.token_crypto.as_ref(), folder.user_id)
                .await?;

        let content = match MimeClass::classify(&file.mime_type) {
            MimeClass::GoogleDoc => {
                self.drive.export_as(&file.remote_file_id, "text/html", &access_token).await?.into_bytes()
            }
            MimeClass::Unsupported => {
                return Ok(FileContent { file_name: file.name, text: String::new() });
            }
            _ => self.drive.download(&file.remote_file_id, &access_token).await?,
        };

        let extracted = extract::extract(&self.ocr, &self.vision, &content, &file.name, &file.mime_type).await?;
        let text = extracted
            .map(|doc| doc.blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n\n"))
            .unwrap_or_default();
        Ok(FileContent { file_name: file.name, text })
    }
}

/// Persists conversation turns (spec.md §4.6 "Persistence").
pub struct ApiConversationSink {
    pub conversations: Arc<dyn ConversationStore>,
}

#[async_trait]
impl ConversationSink for ApiConversationSink {
    async fn append_user_message(&self, conversation_id: Uuid, content: &str) -> Result<(), Error> {
        self.conversations
            .append_message(conversation_id, MessageRole::User, content, HashMap::new())
            .await
            .map(|_| ())
    }

    async fn append_assistant_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        citations: &HashMap<String, Citation>,
    ) -> Result<(), Error> {
        self.conversations
            .append_message(conversation_id, MessageRole::Assistant, content, citations.clone())
            .await
            .map(|_| ())
    }
}
