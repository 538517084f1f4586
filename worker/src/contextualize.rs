//! Contextual chunk enrichment (spec.md §4.1.1): a short LLM-generated
//! prefix situates each chunk within a truncated excerpt of its document,
//! under bounded concurrency so one slow document doesn't starve the
//! worker pool it runs inside.

use drivescout_core::error::Error;
use drivescout_ingestion::chunker::PendingChunk;
use drivescout_llm::{ChatClient, ChatMessage, ToolChatRequest};
use std::sync::Arc;
use tokio::sync::Semaphore;

const CONTEXT_CONCURRENCY: usize = 4;
const DOC_EXCERPT_CHARS: usize = 4000;
const CONTEXT_MAX_TOKENS: u32 = 100;
const MIN_DOCUMENT_CHARS_FOR_CONTEXT: usize = 500;

fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Prefixes each chunk with a generated context sentence, skipping the
/// whole pass for documents below `MIN_DOCUMENT_CHARS_FOR_CONTEXT`. A
/// per-chunk failure or empty response leaves that chunk's text untouched.
pub async fn contextualize_chunks(
    chat: &dyn ChatClient,
    document_text: &str,
    chunks: Vec<PendingChunk>,
) -> Vec<PendingChunk> {
    if document_text.len() <= MIN_DOCUMENT_CHARS_FOR_CONTEXT {
        return chunks;
    }
    let excerpt = truncate_chars(document_text, DOC_EXCERPT_CHARS).to_string();
    let semaphore = Arc::new(Semaphore::new(CONTEXT_CONCURRENCY));

    let tasks = chunks.into_iter().map(|chunk| {
        let semaphore = Arc::clone(&semaphore);
        let excerpt = excerpt.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.expect("context semaphore closed");
            match generate_context(chat, &excerpt, &chunk.text).await {
                Ok(prefix) if !prefix.trim().is_empty() => {
                    PendingChunk { text: format!("{prefix}\n\n{}", chunk.text), location: chunk.location }
                }
                _ => chunk,
            }
        }
    });

    futures::future::join_all(tasks).await
}

async fn generate_context(chat: &dyn ChatClient, excerpt: &str, chunk_text: &str) -> Result<String, Error> {
    let req = ToolChatRequest {
        system: "You situate a chunk of text within its document. Respond with only a 1-2 \
                 sentence context prefix, no preamble or quotation marks."
            .to_string(),
        messages: vec![ChatMessage::user_text(format!(
            "<document>\n{excerpt}\n</document>\n<chunk>\n{chunk_text}\n</chunk>\n\nWrite the context prefix."
        ))],
        tools: vec![],
        max_tokens: CONTEXT_MAX_TOKENS,
    };
    let response = chat.chat_with_tools(req).await?;
    Ok(response.text().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drivescout_core::model::{ElementType, Location};
    use drivescout_llm::{ChatRequest, StreamEvent, Usage};
    use futures::stream::Stream;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct StubChat {
        responses: Mutex<Vec<Result<String, ()>>>,
    }

    #[async_trait]
    impl ChatClient for StubChat {
        async fn stream_chat(
            &self,
            _req: ChatRequest,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>, Error> {
            unimplemented!()
        }

        async fn chat_with_tools(&self, _req: ToolChatRequest) -> Result<ChatMessage, Error> {
            match self.responses.lock().unwrap().remove(0) {
                Ok(text) => Ok(ChatMessage::assistant_text(text)),
                Err(()) => Err(Error::Transient("llm unavailable".into())),
            }
        }
    }

    fn chunk(text: &str) -> PendingChunk {
        PendingChunk {
            text: text.to_string(),
            location: Location::Doc { heading_path: None, element_type: ElementType::Paragraph, para_index: 0 },
        }
    }

    #[tokio::test]
    async fn short_documents_are_left_untouched() {
        let chat = StubChat { responses: Mutex::new(vec![]) };
        let chunks = vec![chunk("short doc")];
        let out = contextualize_chunks(&chat, "short doc", chunks.clone()).await;
        assert_eq!(out, chunks);
    }

    #[tokio::test]
    async fn prefixes_chunks_with_generated_context() {
        let long_doc = "x".repeat(600);
        let chat = StubChat { responses: Mutex::new(vec![Ok("This chunk discusses x.".to_string())]) };
        let out = contextualize_chunks(&chat, &long_doc, vec![chunk("body")]).await;
        assert!(out[0].text.starts_with("This chunk discusses x."));
        assert!(out[0].text.ends_with("body"));
    }

    #[tokio::test]
    async fn failed_generation_keeps_original_text() {
        let long_doc = "x".repeat(600);
        let chat = StubChat { responses: Mutex::new(vec![Err(())]) };
        let out = contextualize_chunks(&chat, &long_doc, vec![chunk("body")]).await;
        assert_eq!(out[0].text, "body");
    }

    #[tokio::test]
    async fn empty_generation_keeps_original_text() {
        let long_doc = "x".repeat(600);
        let chat = StubChat { responses: Mutex::new(vec![Ok("   ".to_string())]) };
        let out = contextualize_chunks(&chat, &long_doc, vec![chunk("body")]).await;
        assert_eq!(out[0].text, "body");
    }
}
