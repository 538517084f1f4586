//! Inspecting a file's indexed chunks directly, outside the agent loop --
//! useful for a front-end's "show me what was indexed" view (spec.md §6).

use axum::extract::{Path, State};
use axum::Json;
use drivescout_core::error::Error;
use drivescout_core::model::Chunk;
use drivescout_storage::{ChunkStore, FileStore, FolderStore};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::server::AppState;

pub async fn get_file_chunk_context(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((folder_id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Chunk>>, Error> {
    let folder = state.folders.get_folder(folder_id).await?;
    if folder.user_id != user_id {
        return Err(Error::NotFound("folder not found".to_string()));
    }
    let file = state.files.get_file_in_folder(folder_id, file_id).await?;
    let mut chunks = state.chunks.get_file_chunks(file.id).await?;
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(Json(chunks))
}
