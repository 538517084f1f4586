//! Conversation and message listing endpoints (spec.md §6), layered over
//! `ConversationStore` the same thin way `handlers::folders` layers over
//! `FolderStore`.

use axum::extract::{Path, State};
use axum::Json;
use drivescout_core::error::Error;
use drivescout_core::model::{Conversation, Message};
use drivescout_storage::{ConversationStore, FolderStore};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::server::AppState;

#[derive(Deserialize, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

async fn owned_folder(state: &AppState, user_id: Uuid, folder_id: Uuid) -> Result<(), Error> {
    let folder = state.folders.get_folder(folder_id).await?;
    if folder.user_id != user_id {
        return Err(Error::NotFound("folder not found".to_string()));
    }
    Ok(())
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, Error> {
    owned_folder(&state, user_id, folder_id).await?;
    let title = body.title;
    if let Some(title) = &title {
        if title.chars().count() > state.config.max_conversation_title_length {
            return Err(Error::Validation("conversation title too long".to_string()));
        }
    }
    let conversation = state.conversations.create_conversation(folder_id, title).await?;
    Ok(Json(conversation))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<Json<Vec<Conversation>>, Error> {
    owned_folder(&state, user_id, folder_id).await?;
    let conversations = state.conversations.list_conversations(folder_id).await?;
    Ok(Json(conversations))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, Error> {
    let conversation = state.conversations.get_conversation(conversation_id).await?;
    owned_folder(&state, user_id, conversation.folder_id).await?;
    let messages = state.conversations.list_messages(conversation_id).await?;
    Ok(Json(messages))
}
