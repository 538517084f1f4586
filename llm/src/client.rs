//! `ChatClient`: the LLM capability consumed by the rest of the workspace
//! (spec.md §6). One HTTP implementation against an Anthropic-shaped
//! Messages API -- chosen because the spec's tool-use/vision message
//! shapes match that API's block model directly
//! (`examples/original_source/backend/app/services/anthropic.py`).

use crate::types::{ChatMessage, ChatRequest, ContentBlock, Role, StreamEvent, ToolChatRequest, Usage};
use async_trait::async_trait;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use std::time::Duration;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Streams a completion as text fragments in generation order, per
    /// spec.md §6's streaming-chat capability.
    async fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>, Error>;

    /// Non-streaming chat with tools: returns the assistant turn, which
    /// may contain text and/or one or more `ToolUse` blocks.
    async fn chat_with_tools(&self, req: ToolChatRequest) -> Result<ChatMessage, Error>;
}

pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpChatClient {
    pub fn new(config: &AppConfig, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout_standard)
            .build()
            .expect("failed to build llm http client");
        Self { client, base_url: config.llm_api_base_url.clone(), api_key: config.llm_api_key.clone(), model }
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

fn to_wire_messages(messages: &[ChatMessage]) -> serde_json::Value {
    json!(messages
        .iter()
        .map(|m| {
            json!({
                "role": match m.role { Role::User => "user", Role::Assistant => "assistant" },
                "content": m.content,
            })
        })
        .collect::<Vec<_>>())
}

#[derive(Deserialize)]
struct NonStreamingResponse {
    content: Vec<ContentBlock>,
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>, Error> {
        let body = json!({
            "model": self.model,
            "system": req.system,
            "messages": to_wire_messages(&req.messages),
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let byte_stream = resp.bytes_stream();
        let event_stream = sse_text_deltas(byte_stream);
        Ok(Box::pin(event_stream))
    }

    async fn chat_with_tools(&self, req: ToolChatRequest) -> Result<ChatMessage, Error> {
        let client = &self.client;
        let base_url = &self.base_url;
        let api_key = &self.api_key;
        let model = &self.model;

        retry_with_backoff(Self::retry_policy(), || async {
            let body = json!({
                "model": model,
                "system": req.system,
                "messages": to_wire_messages(&req.messages),
                "tools": req.tools,
                "max_tokens": req.max_tokens,
            });
            let resp = client
                .post(format!("{base_url}/messages"))
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let parsed: NonStreamingResponse = resp.json().await?;
            Ok(ChatMessage { role: Role::Assistant, content: parsed.content })
        })
        .await
    }
}

/// Parses an upstream SSE byte stream of `content_block_delta` /
/// `message_delta` events into `StreamEvent`s, in arrival order.
fn sse_text_deltas(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<StreamEvent, Error>> + Send {
    async_stream::stream! {
        let mut buf = String::new();
        let mut usage = Usage::default();
        futures::pin_mut!(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(Error::from(e));
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find("\n\n") {
                let event = buf[..pos].to_string();
                buf.drain(..pos + 2);

                let Some(data_line) = event.lines().find(|l| l.starts_with("data:")) else { continue };
                let data = data_line.trim_start_matches("data:").trim();
                if data == "[DONE]" {
                    yield Ok(StreamEvent::Done(usage));
                    return;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else { continue };
                match value.get("type").and_then(|t| t.as_str()) {
                    Some("content_block_delta") => {
                        if let Some(text) = value.pointer("/delta/text").and_then(|t| t.as_str()) {
                            yield Ok(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    Some("message_delta") => {
                        if let Some(out) = value.pointer("/usage/output_tokens").and_then(|t| t.as_u64()) {
                            usage.output_tokens = out as u32;
                        }
                    }
                    Some("message_start") => {
                        if let Some(inp) = value.pointer("/message/usage/input_tokens").and_then(|t| t.as_u64()) {
                            usage.input_tokens = inp as u32;
                        }
                    }
                    _ => {}
                }
            }
        }
        yield Ok(StreamEvent::Done(usage));
    }
}
