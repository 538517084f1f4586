//! The agent control loop (spec.md §4.6): a bounded tool-calling dialogue
//! over exactly three tools, streamed to the caller as `agent_status` ->
//! `token` -> `done` events, with citation extraction and forced
//! synthesis on iteration exhaustion.
//!
//! Grounded on `examples/original_source/backend/app/services/chat/agent.py`
//! for the system-prompt template shape and iteration/tool-dispatch control
//! flow, re-expressed as a Rust `while` loop over an mpsc channel rather
//! than a Python async generator (spec.md §9: "streaming generators become
//! producer-side queues"), and on the teacher's
//! `backend/api/src/handlers/chat.rs` for the channel-producer /
//! SSE-consumer streaming shape.

use crate::citations::{extract_citations, IndexedChunk};
use crate::client::ChatClient;
use crate::types::{ChatMessage, ChatRequest, ContentBlock, Role, StreamEvent, ToolChatRequest, ToolDef};
use async_trait::async_trait;
use drivescout_core::error::Error;
use drivescout_core::model::Citation;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const MAX_ITER: u32 = 10;
pub const CONTEXT_TOP_K: usize = 8;
pub const STANDARD_INITIAL_TOP_K: usize = 30;
pub const STANDARD_FINAL_TOP_K: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Searching,
    ReadingFile,
    Processing,
    Rewriting,
    Generating,
}

impl AgentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPhase::Searching => "searching",
            AgentPhase::ReadingFile => "reading_file",
            AgentPhase::Processing => "processing",
            AgentPhase::Rewriting => "rewriting",
            AgentPhase::Generating => "generating",
        }
    }
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Status { phase: AgentPhase, iteration: u32, tool: Option<String> },
    Token(String),
    Done {
        citations: HashMap<String, Citation>,
        searched_files: Vec<String>,
        conversation_id: Uuid,
        iterations: u32,
    },
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub file_id: Uuid,
    pub file_name: String,
    pub excerpt: String,
    pub location: String,
    pub score: f32,
    pub source_url: String,
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub file_name: String,
    pub text: String,
}

/// The three tools the agent loop may call (spec.md §4.6). One concrete
/// implementation lives in the API layer, wiring `search_folder` to
/// `storage`'s hybrid retriever and `get_file_chunks`/`get_file` to the
/// file/chunk repositories and drive client respectively.
#[async_trait]
pub trait AgentTools: Send + Sync {
    async fn search_folder(&self, folder_id: Uuid, query: &str) -> Result<Vec<SearchHit>, Error>;
    async fn get_file_chunks(&self, folder_id: Uuid, file_id: Uuid) -> Result<FileContent, Error>;
    async fn get_file(&self, folder_id: Uuid, file_id: Uuid) -> Result<FileContent, Error>;
}

/// Persists conversation turns at turn boundaries so a dropped stream
/// still leaves committed state (spec.md §4.6 "Persistence").
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn append_user_message(&self, conversation_id: Uuid, content: &str) -> Result<(), Error>;
    async fn append_assistant_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        citations: &HashMap<String, Citation>,
    ) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct FolderContext {
    pub folder_id: Uuid,
    pub folder_name: String,
    pub files_total: i64,
    pub files_indexed: i64,
}

fn tool_defs() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "search_folder".to_string(),
            description: "Search the folder's indexed documents for chunks relevant to a query.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"],
            }),
        },
        ToolDef {
            name: "get_file_chunks".to_string(),
            description: "Fetch all indexed chunks of a specific file, concatenated.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "file_id": { "type": "string" } },
                "required": ["file_id"],
            }),
        },
        ToolDef {
            name: "get_file".to_string(),
            description: "Re-download and re-extract a file from the source drive for the freshest content."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "file_id": { "type": "string" } },
                "required": ["file_id"],
            }),
        },
    ]
}

fn system_prompt(folder: &FolderContext, iteration: u32) -> String {
    format!(
        "You are a research assistant answering questions about the documents in the folder \"{}\" \
         ({} of {} files indexed). You have {} tool-call iterations remaining. Use search_folder to find \
         relevant passages, get_file_chunks to read an entire indexed file, and get_file to re-fetch the \
         freshest copy of a file from the source drive. Cite every factual claim with a numbered citation \
         like [1] referring to the order in which chunks were returned by your tool calls.",
        folder.folder_name,
        folder.files_indexed,
        folder.files_total,
        MAX_ITER - iteration
    )
}

fn search_payload(hits: &[SearchHit]) -> serde_json::Value {
    serde_json::json!(hits
        .iter()
        .take(10)
        .map(|h| serde_json::json!({
            "file_name": h.file_name,
            "excerpt": h.excerpt,
            "location": h.location,
            "score": h.score,
        }))
        .collect::<Vec<_>>())
}

struct RunState {
    indexed_chunks: Vec<IndexedChunk>,
    searched_files: Vec<String>,
    searched_files_seen: std::collections::HashSet<String>,
}

impl RunState {
    fn new() -> Self {
        Self { indexed_chunks: Vec::new(), searched_files: Vec::new(), searched_files_seen: std::collections::HashSet::new() }
    }

    fn record_file(&mut self, name: &str) {
        if self.searched_files_seen.insert(name.to_string()) {
            self.searched_files.push(name.to_string());
        }
    }

    /// Appends newly-seen chunks (deduplicated by chunk id) from a search
    /// result, per spec.md §4.6's `search_folder` contract.
    fn record_hits(&mut self, hits: &[SearchHit]) {
        let seen: std::collections::HashSet<Uuid> = self.indexed_chunks.iter().map(|c| c.chunk_id).collect();
        for hit in hits {
            self.record_file(&hit.file_name);
            if !seen.contains(&hit.chunk_id) {
                self.indexed_chunks.push(IndexedChunk {
                    chunk_id: hit.chunk_id,
                    file_name: hit.file_name.clone(),
                    location: hit.location.clone(),
                    excerpt: hit.excerpt.clone(),
                    source_url: hit.source_url.clone(),
                });
            }
        }
    }
}

/// Runs the bounded tool-calling loop for one user turn, emitting events
/// to `tx` in order and returning the final outcome once the stream ends.
#[allow(clippy::too_many_arguments)]
pub async fn run_agent(
    chat: Arc<dyn ChatClient>,
    tools: Arc<dyn AgentTools>,
    sink: Arc<dyn ConversationSink>,
    folder: FolderContext,
    history: Vec<ChatMessage>,
    user_message: String,
    conversation_id: Uuid,
    tx: mpsc::Sender<AgentEvent>,
) -> Result<(), Error> {
    sink.append_user_message(conversation_id, &user_message).await?;

    let mut messages = history;
    messages.push(ChatMessage::user_text(&user_message));

    let mut state = RunState::new();
    let mut iteration = 0u32;
    let mut last_had_tool_use = false;
    let mut final_text: Option<String> = None;

    while iteration < MAX_ITER {
        let response = chat
            .chat_with_tools(ToolChatRequest {
                system: system_prompt(&folder, iteration),
                messages: messages.clone(),
                tools: tool_defs(),
                max_tokens: 4096,
            })
            .await?;

        if !response.has_tool_use() {
            final_text = Some(response.text());
            last_had_tool_use = false;
            break;
        }
        last_had_tool_use = true;

        let tool_uses: Vec<(String, String, serde_json::Value)> = response
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();
        messages.push(response);

        let mut tool_results = Vec::new();
        for (id, name, input) in &tool_uses {
            let phase = match name.as_str() {
                "search_folder" => AgentPhase::Searching,
                "get_file_chunks" | "get_file" => AgentPhase::ReadingFile,
                _ => AgentPhase::Processing,
            };
            let _ = tx
                .send(AgentEvent::Status { phase, iteration, tool: Some(name.clone()) })
                .await;

            let result = dispatch_tool(tools.as_ref(), folder.folder_id, name, input, &mut state).await;
            let (content, is_error) = match result {
                Ok(text) => (text, false),
                Err(e) => (format!("tool error: {e}"), true),
            };
            tool_results.push(ContentBlock::ToolResult { tool_use_id: id.clone(), content, is_error });
        }
        messages.push(ChatMessage { role: Role::User, content: tool_results });
        iteration += 1;
    }

    let final_text = match final_text {
        Some(text) => text,
        None if iteration >= MAX_ITER && last_had_tool_use => {
            let _ = tx.send(AgentEvent::Status { phase: AgentPhase::Rewriting, iteration, tool: None }).await;
            forced_synthesis(chat.as_ref(), &folder, &state).await
        }
        None => String::new(),
    };

    let _ = tx.send(AgentEvent::Status { phase: AgentPhase::Generating, iteration, tool: None }).await;
    for fragment in fragment_text(&final_text) {
        let _ = tx.send(AgentEvent::Token(fragment)).await;
    }

    let citations = extract_citations(&final_text, &state.indexed_chunks);
    sink.append_assistant_message(conversation_id, &final_text, &citations).await?;

    let _ = tx
        .send(AgentEvent::Done {
            citations,
            searched_files: state.searched_files.clone(),
            conversation_id,
            iterations: iteration,
        })
        .await;

    Ok(())
}

async fn dispatch_tool(
    tools: &dyn AgentTools,
    folder_id: Uuid,
    name: &str,
    input: &serde_json::Value,
    state: &mut RunState,
) -> Result<String, Error> {
    match name {
        "search_folder" => {
            let query = input.get("query").and_then(|q| q.as_str()).unwrap_or_default();
            let hits = tools.search_folder(folder_id, query).await?;
            state.record_hits(&hits);
            Ok(search_payload(&hits).to_string())
        }
        "get_file_chunks" => {
            let file_id = parse_file_id(input)?;
            let content = tools.get_file_chunks(folder_id, file_id).await?;
            state.record_file(&content.file_name);
            Ok(content.text)
        }
        "get_file" => {
            let file_id = parse_file_id(input)?;
            let content = tools.get_file(folder_id, file_id).await?;
            state.record_file(&content.file_name);
            Ok(content.text)
        }
        other => Err(Error::Validation(format!("unknown tool {other}"))),
    }
}

fn parse_file_id(input: &serde_json::Value) -> Result<Uuid, Error> {
    input
        .get("file_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| Error::Validation("missing or invalid file_id".to_string()))
}

/// One extra tool-less LLM call summarizing accumulated `indexed_chunks`
/// when the loop exhausts `MAX_ITER` with tools still requested.
async fn forced_synthesis(chat: &dyn ChatClient, folder: &FolderContext, state: &RunState) -> String {
    let summary = state
        .indexed_chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] file: {}: {}", i + 1, c.file_name, c.excerpt))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "You have run out of tool-call iterations. Using only the following previously retrieved excerpts, \
         write a final answer with numeric citations like [1]:\n\n{summary}"
    );

    let result = chat
        .chat_with_tools(ToolChatRequest {
            system: system_prompt(folder, MAX_ITER),
            messages: vec![ChatMessage::user_text(prompt)],
            tools: Vec::new(),
            max_tokens: 2048,
        })
        .await;

    match result {
        Ok(msg) if !msg.text().trim().is_empty() => msg.text(),
        _ => "I was unable to finish researching this within the allotted steps. Please try a narrower question."
            .to_string(),
    }
}

/// Splits `text` into whitespace-preserving word fragments for the
/// `token` event stream -- order-preserving, never reordered.
fn fragment_text(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// The simpler, non-agent chat path (spec.md §4.6 "Standard (non-agent)
/// mode"): one retrieval call, a numbered context block of the top
/// `CONTEXT_TOP_K` chunks, a single streamed completion, then citations.
pub async fn run_standard_chat(
    chat: Arc<dyn ChatClient>,
    sink: Arc<dyn ConversationSink>,
    folder: FolderContext,
    hits: Vec<SearchHit>,
    history: Vec<ChatMessage>,
    user_message: String,
    conversation_id: Uuid,
    tx: mpsc::Sender<AgentEvent>,
) -> Result<(), Error> {
    sink.append_user_message(conversation_id, &user_message).await?;

    let top_hits: Vec<&SearchHit> = hits.iter().take(CONTEXT_TOP_K).collect();
    let indexed_chunks: Vec<IndexedChunk> = top_hits
        .iter()
        .map(|h| IndexedChunk {
            chunk_id: h.chunk_id,
            file_name: h.file_name.clone(),
            location: h.location.clone(),
            excerpt: h.excerpt.clone(),
            source_url: h.source_url.clone(),
        })
        .collect();

    let context = indexed_chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {} ({}): {}", i + 1, c.file_name, c.location, c.excerpt))
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = format!(
        "You are a research assistant answering questions about the folder \"{}\". Use only the numbered \
         context below and cite claims with [n]:\n\n{context}",
        folder.folder_name
    );

    let _ = tx.send(AgentEvent::Status { phase: AgentPhase::Generating, iteration: 0, tool: None }).await;

    let mut messages = history;
    messages.push(ChatMessage::user_text(&user_message));

    let mut stream = chat
        .stream_chat(ChatRequest { system, messages, max_tokens: 2048, temperature: 0.3 })
        .await?;

    let mut final_text = String::new();
    use futures::StreamExt;
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta(piece) => {
                final_text.push_str(&piece);
                let _ = tx.send(AgentEvent::Token(piece)).await;
            }
            StreamEvent::Done(_) => break,
        }
    }

    let citations = extract_citations(&final_text, &indexed_chunks);
    sink.append_assistant_message(conversation_id, &final_text, &citations).await?;

    let searched_files: Vec<String> = {
        let mut seen = std::collections::HashSet::new();
        indexed_chunks
            .iter()
            .filter(|c| seen.insert(c.file_name.clone()))
            .map(|c| c.file_name.clone())
            .collect()
    };

    let _ = tx
        .send(AgentEvent::Done { citations, searched_files, conversation_id, iterations: 0 })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockChatClient;
    use crate::types::Role;
    use std::sync::Mutex;

    struct StubTools {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl AgentTools for StubTools {
        async fn search_folder(&self, _folder_id: Uuid, _query: &str) -> Result<Vec<SearchHit>, Error> {
            Ok(self.hits.clone())
        }
        async fn get_file_chunks(&self, _folder_id: Uuid, _file_id: Uuid) -> Result<FileContent, Error> {
            Ok(FileContent { file_name: "Doc A".to_string(), text: "full file text".to_string() })
        }
        async fn get_file(&self, _folder_id: Uuid, _file_id: Uuid) -> Result<FileContent, Error> {
            Ok(FileContent { file_name: "Doc A".to_string(), text: "fresh file text".to_string() })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        user_messages: Mutex<Vec<String>>,
        assistant_messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConversationSink for RecordingSink {
        async fn append_user_message(&self, _conversation_id: Uuid, content: &str) -> Result<(), Error> {
            self.user_messages.lock().unwrap().push(content.to_string());
            Ok(())
        }
        async fn append_assistant_message(
            &self,
            _conversation_id: Uuid,
            content: &str,
            _citations: &HashMap<String, Citation>,
        ) -> Result<(), Error> {
            self.assistant_messages.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    fn hit(file_name: &str) -> SearchHit {
        SearchHit {
            chunk_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            excerpt: "Revenue rose 15% in Q4".to_string(),
            location: "p.1".to_string(),
            score: 0.9,
            source_url: "https://example.com".to_string(),
        }
    }

    fn tool_use_response(name: &str, input: serde_json::Value) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse { id: "tool1".to_string(), name: name.to_string(), input }],
        }
    }

    #[tokio::test]
    async fn agent_emits_status_then_tokens_then_done() {
        let hits = vec![hit("Doc A"), hit("Doc B")];
        let responses = vec![
            tool_use_response("search_folder", serde_json::json!({"query": "revenue"})),
            ChatMessage::assistant_text("Revenue rose [1] and also [2]."),
        ];
        let chat = Arc::new(MockChatClient::new(responses, ""));
        let tools = Arc::new(StubTools { hits });
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::channel(32);
        let conversation_id = Uuid::new_v4();

        run_agent(
            chat,
            tools,
            sink.clone(),
            FolderContext { folder_id: Uuid::new_v4(), folder_name: "Reports".into(), files_total: 3, files_indexed: 3 },
            Vec::new(),
            "What was Q4 revenue?".into(),
            conversation_id,
            tx,
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }

        assert!(matches!(events.first(), Some(AgentEvent::Status { phase: AgentPhase::Searching, .. })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Token(_))));
        match events.last().unwrap() {
            AgentEvent::Done { citations, searched_files, iterations, .. } => {
                assert_eq!(citations.len(), 2);
                assert_eq!(searched_files, &vec!["Doc A".to_string(), "Doc B".to_string()]);
                assert_eq!(*iterations, 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }
        assert_eq!(sink.user_messages.lock().unwrap().len(), 1);
        assert_eq!(sink.assistant_messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forced_synthesis_runs_when_iterations_exhausted() {
        let hits = vec![hit("Doc A")];
        // 10 tool-use responses exhaust MAX_ITER, then the forced-synthesis
        // call (tools=[]) gets the 11th scripted response.
        let mut responses: Vec<ChatMessage> = (0..10)
            .map(|_| tool_use_response("search_folder", serde_json::json!({"query": "revenue"})))
            .collect();
        responses.push(ChatMessage::assistant_text("Final answer [1]."));
        let chat = Arc::new(MockChatClient::new(responses, ""));
        let tools = Arc::new(StubTools { hits });
        let sink = Arc::new(RecordingSink::default());
        let (tx, mut rx) = mpsc::channel(64);

        run_agent(
            chat,
            tools,
            sink,
            FolderContext { folder_id: Uuid::new_v4(), folder_name: "Reports".into(), files_total: 1, files_indexed: 1 },
            Vec::new(),
            "Q".into(),
            Uuid::new_v4(),
            tx,
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        match events.last().unwrap() {
            AgentEvent::Done { iterations, .. } => assert_eq!(*iterations, MAX_ITER),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn fragment_text_preserves_order_and_content() {
        let frags = fragment_text("Revenue rose 15%.");
        assert_eq!(frags.join(""), "Revenue rose 15%.");
    }
}
