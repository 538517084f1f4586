//! Vision description extraction: a vision-capable LLM produces one
//! descriptive block per image, grounded on
//! `original_source/backend/app/services/file/extraction/image.py`.

use crate::block::{ExtractedDocument, TextBlock};
use async_trait::async_trait;
use base64::Engine;
use drivescout_core::error::Error;
use drivescout_core::model::Location;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use drivescout_llm::{ChatClient, ChatMessage, ContentBlock, Role, ToolChatRequest};
use std::sync::Arc;
use std::time::Duration;

/// Vision capability consumed by the image extractor (spec.md §6: "Vision:
/// messages may include base64 image blocks with media type"). A thin
/// trait so `ingestion` doesn't need the rest of `llm`'s agent machinery.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe_image(&self, image_bytes: &[u8], media_type: &str, file_name: &str) -> Result<String, Error>;
}

pub struct ImageExtractor {
    vision: Arc<dyn VisionProvider>,
}

impl ImageExtractor {
    pub fn new(vision: Arc<dyn VisionProvider>) -> Self {
        Self { vision }
    }

    pub async fn extract(
        &self,
        image_content: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<ExtractedDocument, Error> {
        let media_type = normalize_media_type(mime_type);
        let description = self.vision.describe_image(image_content, &media_type, file_name).await?;

        Ok(ExtractedDocument {
            title: Some(file_name.to_string()),
            blocks: vec![TextBlock {
                text: description,
                location: Location::Image,
                heading_context: None,
            }],
        })
    }
}

fn normalize_media_type(mime_type: &str) -> String {
    if mime_type == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        mime_type.to_string()
    }
}

/// `VisionProvider` backed by the chat capability's vision messages
/// (spec.md §6: "messages may include base64 image blocks"), retried up
/// to 3 times on transient errors per spec.md §4.3's image-extractor
/// clause.
pub struct ChatVisionProvider {
    chat: Arc<dyn ChatClient>,
}

impl ChatVisionProvider {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(20))
    }
}

#[async_trait]
impl VisionProvider for ChatVisionProvider {
    async fn describe_image(&self, image_bytes: &[u8], media_type: &str, file_name: &str) -> Result<String, Error> {
        let data = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let chat = self.chat.as_ref();

        retry_with_backoff(Self::retry_policy(), || async {
            let message = ChatMessage {
                role: Role::User,
                content: vec![
                    ContentBlock::Image { media_type: media_type.to_string(), data: data.clone() },
                    ContentBlock::Text {
                        text: format!("Describe the contents of this image (filename: {file_name}) in detail."),
                    },
                ],
            };
            let response = chat
                .chat_with_tools(ToolChatRequest {
                    system: "You produce a single thorough descriptive paragraph for an image, for use as \
                             searchable document content."
                        .to_string(),
                    messages: vec![message],
                    tools: Vec::new(),
                    max_tokens: 1024,
                })
                .await?;
            Ok(response.text())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubVision(&'static str);

    #[async_trait]
    impl VisionProvider for StubVision {
        async fn describe_image(&self, _bytes: &[u8], _media_type: &str, _file_name: &str) -> Result<String, Error> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn produces_single_block_with_description() {
        let extractor = ImageExtractor::new(Arc::new(StubVision("a photo of a cat")));
        let doc = extractor.extract(b"fake-bytes", "image/png", "cat.png").await.unwrap();
        assert_eq!(doc.title.as_deref(), Some("cat.png"));
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.blocks[0].text, "a photo of a cat");
        assert_eq!(doc.blocks[0].location, Location::Image);
    }

    #[test]
    fn normalizes_jpg_to_jpeg() {
        assert_eq!(normalize_media_type("image/jpg"), "image/jpeg");
        assert_eq!(normalize_media_type("image/png"), "image/png");
    }
}
