//! Folder CRUD and the manual-sync trigger (spec.md §6 "Public HTTP
//! surface"), grounded on the teacher's resource-handler shape in
//! `backend/api/src/handlers/*.rs` (a thin `State<AppState>` + path/body
//! extractor pulling straight through to a store call).

use axum::extract::{Path, State};
use axum::Json;
use drivescout_core::error::Error;
use drivescout_core::model::Folder;
use drivescout_storage::session::resolve_access_token;
use drivescout_storage::FolderStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    pub remote_folder_id: String,
    pub name: String,
}

/// Authorization check shared by every folder-scoped handler: a folder
/// not owned by the caller is reported as `NotFound`, not `Auth`, so its
/// existence isn't leaked to other users.
async fn owned_folder(state: &AppState, user_id: Uuid, folder_id: Uuid) -> Result<Folder, Error> {
    let folder = state.folders.get_folder(folder_id).await?;
    if folder.user_id != user_id {
        return Err(Error::NotFound("folder not found".to_string()));
    }
    Ok(folder)
}

pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateFolderRequest>,
) -> Result<Json<Folder>, Error> {
    if body.remote_folder_id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(Error::Validation("remote_folder_id and name are required".to_string()));
    }
    let folder = state.folders.create_folder(user_id, &body.remote_folder_id, &body.name).await?;
    Ok(Json(folder))
}

pub async fn list_folders(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Folder>>, Error> {
    let folders = state.folders.list_folders(user_id).await?;
    Ok(Json(folders))
}

pub async fn get_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<Json<Folder>, Error> {
    let folder = owned_folder(&state, user_id, folder_id).await?;
    Ok(Json(folder))
}

pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<(), Error> {
    owned_folder(&state, user_id, folder_id).await?;
    state.folders.delete_folder(folder_id).await
}

#[derive(Serialize)]
pub struct FolderStatusResponse {
    #[serde(flatten)]
    pub folder: Folder,
}

pub async fn folder_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<Json<FolderStatusResponse>, Error> {
    let folder = owned_folder(&state, user_id, folder_id).await?;
    let folder = state.folders.recompute_folder_progress(folder.id).await?;
    Ok(Json(FolderStatusResponse { folder }))
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub outcome: String,
}

/// Runs a synchronous manual sync, bounded by `sync_limiter` so a burst of
/// `POST /sync` calls cannot open unbounded concurrent upstream listings
/// (spec.md §4.2: the sync frequency cap is per-folder, but nothing else
/// bounds fan-out across folders).
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<Json<SyncResponse>, Error> {
    let folder = owned_folder(&state, user_id, folder_id).await?;

    let _permit = state.sync_limiter.acquire().await;

    let access_token =
        resolve_access_token(state.sessions.as_ref(), state.token_refresher.as_ref(), state.token_crypto.as_ref(), user_id)
            .await?;

    let outcome = drivescout_sync::sync_folder(
        &state.config,
        state.drive.as_ref(),
        state.folders.as_ref(),
        state.files.as_ref(),
        state.jobs.as_ref(),
        &folder,
        &access_token,
    )
    .await?;

    let outcome_label = match outcome {
        drivescout_sync::SyncOutcome::SkippedRecentSync => "skipped_recent_sync".to_string(),
        drivescout_sync::SyncOutcome::Failed { reason } => format!("failed:{reason}"),
        drivescout_sync::SyncOutcome::Synced { added, modified, deleted } => {
            format!("synced added={added} modified={modified} deleted={deleted}")
        }
    };

    Ok(Json(SyncResponse { outcome: outcome_label }))
}
