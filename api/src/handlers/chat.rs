//! Streams an agent or standard-mode chat turn over SSE, grounded on the
//! teacher's `chat_stream` handler shape in `backend/api/src/handlers/chat.rs`
//! (an `mpsc` channel fed by a spawned task, drained by a `ReceiverStream`
//! wrapped in `axum::response::sse::Sse`), re-pointed from a local LLM
//! singleton at the `llm::agent` event-producing functions.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use drivescout_core::error::Error;
use drivescout_core::model::{Conversation, MessageRole};
use drivescout_llm::agent::{run_agent, run_standard_chat, AgentEvent, FolderContext, STANDARD_FINAL_TOP_K, STANDARD_INITIAL_TOP_K};
use drivescout_llm::types::ChatMessage;
use drivescout_storage::{ConversationStore, FolderStore};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::agent_tools::ranked_to_hits;
use crate::auth::AuthUser;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct ChatTurnRequest {
    pub message: String,
    /// `"agent"` (default) runs the bounded tool-calling loop; `"standard"`
    /// runs the single-retrieval-call path (spec.md §4.6).
    #[serde(default)]
    pub mode: Option<String>,
}

async fn load_history(state: &AppState, conversation_id: Uuid) -> Result<Vec<ChatMessage>, Error> {
    let messages = state.conversations.list_messages(conversation_id).await?;
    Ok(messages
        .into_iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user_text(m.content),
            MessageRole::Assistant => ChatMessage::assistant_text(m.content),
        })
        .collect())
}

async fn owned_conversation(state: &AppState, user_id: Uuid, conversation_id: Uuid) -> Result<Conversation, Error> {
    let conversation = state.conversations.get_conversation(conversation_id).await?;
    let folder = state.folders.get_folder(conversation.folder_id).await?;
    if folder.user_id != user_id {
        return Err(Error::NotFound("conversation not found".to_string()));
    }
    Ok(conversation)
}

fn to_sse_event(event: AgentEvent) -> Event {
    match event {
        AgentEvent::Status { phase, iteration, tool } => {
            Event::default().event("agent_status").json_data(json!({
                "phase": phase.as_str(),
                "iteration": iteration,
                "tool": tool,
            }))
        }
        AgentEvent::Token(text) => Event::default().event("token").json_data(json!({ "token": text })),
        AgentEvent::Done { citations, searched_files, conversation_id, iterations } => {
            Event::default().event("done").json_data(json!({
                "done": true,
                "citations": citations,
                "searched_files": searched_files,
                "conversation_id": conversation_id,
                "iterations": iterations,
            }))
        }
    }
    .unwrap_or_else(|_| Event::default().event("error").data("failed to encode event"))
}

pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<ChatTurnRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Error> {
    if body.message.chars().count() > state.config.max_chat_message_length {
        return Err(Error::Validation("chat message too long".to_string()));
    }

    let conversation = owned_conversation(&state, user_id, conversation_id).await?;
    let folder = state.folders.get_folder(conversation.folder_id).await?;
    let history = load_history(&state, conversation_id).await?;

    let folder_ctx = FolderContext {
        folder_id: folder.id,
        folder_name: folder.name.clone(),
        files_total: folder.files_total,
        files_indexed: folder.files_indexed,
    };

    let (tx, rx) = mpsc::channel::<AgentEvent>(128);
    let (sse_tx, sse_rx) = mpsc::channel::<Result<Event, Infallible>>(128);

    tokio::spawn(async move {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            if sse_tx.send(Ok(to_sse_event(event))).await.is_err() {
                break;
            }
        }
    });

    let is_standard = body.mode.as_deref() == Some("standard");
    let chat = state.chat.clone();
    let sink = state.conversation_sink.clone();
    let user_message = body.message.clone();

    if is_standard {
        let hits = state
            .retriever
            .hybrid_retrieve_and_rerank(&user_message, folder.id, STANDARD_INITIAL_TOP_K as i64, STANDARD_FINAL_TOP_K)
            .await
            .map(ranked_to_hits)?;
        tokio::spawn(async move {
            let _ = run_standard_chat(chat, sink, folder_ctx, hits, history, user_message, conversation_id, tx).await;
        });
    } else {
        let tools = state.agent_tools.clone();
        tokio::spawn(async move {
            let _ = run_agent(chat, tools, sink, folder_ctx, history, user_message, conversation_id, tx).await;
        });
    }

    Ok(Sse::new(ReceiverStream::new(sse_rx)).keep_alive(KeepAlive::default()))
}
