//! The chat-completion and agent capabilities (spec.md §4.6, §6): a
//! provider-agnostic `ChatClient` trait with one HTTP implementation, the
//! bounded tool-calling agent loop, the simpler standard chat path, and
//! citation extraction shared by both.

pub mod agent;
pub mod citations;
pub mod client;
pub mod types;

pub use agent::{
    run_agent, run_standard_chat, AgentEvent, AgentPhase, AgentTools, ConversationSink, FileContent,
    FolderContext, SearchHit, CONTEXT_TOP_K, MAX_ITER, STANDARD_FINAL_TOP_K, STANDARD_INITIAL_TOP_K,
};
pub use citations::{extract_citations, referenced_numbers, IndexedChunk};
pub use client::{ChatClient, HttpChatClient};
pub use types::{ChatMessage, ChatRequest, ContentBlock, Role, StreamEvent, ToolChatRequest, ToolDef, Usage};
