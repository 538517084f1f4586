//! Repository traits for dependency injection and testing (spec.md §6
//! Persistence; spec.md §3 entity list), grounded on the single broad
//! `FileRepository` trait shape in
//! `examples/other_examples/0f43401d_..._traits.rs.rs`, split by entity
//! group since this workspace's entities are more loosely related than
//! that example's single-tenant file/chunk/job cluster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drivescout_core::error::Error;
use drivescout_core::model::{
    Chunk, Conversation, FailedTask, File, FileIndexStatus, Folder, IndexingJob, Message, Session, User,
};
use uuid::Uuid;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_or_create_user(&self, external_id: &str, email: &str) -> Result<User, Error>;
    async fn get_user(&self, id: Uuid) -> Result<User, Error>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        user_id: Uuid,
        access_token_enc: String,
        refresh_token_enc: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, Error>;

    /// The most recently created session for `user_id`, if any.
    async fn get_session_for_user(&self, user_id: Uuid) -> Result<Option<Session>, Error>;

    async fn get_session(&self, id: Uuid) -> Result<Session, Error>;

    /// Overwrites the encrypted token fields and expiry on an existing
    /// session row, returning the updated row.
    async fn update_session_tokens(
        &self,
        id: Uuid,
        access_token_enc: String,
        refresh_token_enc: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, Error>;

    async fn delete_session(&self, id: Uuid) -> Result<(), Error>;
}

#[async_trait]
pub trait FolderStore: Send + Sync {
    async fn create_folder(&self, user_id: Uuid, remote_folder_id: &str, name: &str) -> Result<Folder, Error>;
    async fn get_folder(&self, id: Uuid) -> Result<Folder, Error>;
    async fn list_folders(&self, user_id: Uuid) -> Result<Vec<Folder>, Error>;
    async fn delete_folder(&self, id: Uuid) -> Result<(), Error>;

    async fn set_folder_error(&self, id: Uuid, reason: &str) -> Result<(), Error>;

    async fn set_folder_synced(&self, id: Uuid, files_total: i64, synced_at: DateTime<Utc>) -> Result<(), Error>;

    /// Recomputes `files_indexed`/`index_status` from the files table
    /// (spec.md §4.1 step 10). Non-transactional: eventual consistency
    /// with chunk writes is acceptable (spec.md §5).
    async fn recompute_folder_progress(&self, id: Uuid) -> Result<Folder, Error>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create_file(
        &self,
        folder_id: Uuid,
        remote_file_id: &str,
        name: &str,
        mime_type: &str,
        modified_time: Option<DateTime<Utc>>,
    ) -> Result<File, Error>;

    async fn get_file(&self, id: Uuid) -> Result<File, Error>;

    /// Authorization-scoped lookup used by the agent tools: errors with
    /// `NotFound` if the file does not belong to `folder_id`.
    async fn get_file_in_folder(&self, folder_id: Uuid, file_id: Uuid) -> Result<File, Error>;

    async fn list_files(&self, folder_id: Uuid) -> Result<Vec<File>, Error>;

    async fn get_file_by_remote_id(&self, folder_id: Uuid, remote_file_id: &str) -> Result<Option<File>, Error>;

    async fn set_file_status(&self, id: Uuid, status: FileIndexStatus) -> Result<(), Error>;

    /// Marks a file Pending ahead of re-index and clears its stale derived
    /// state (spec.md §4.2 "modified" branch).
    async fn reset_file_for_reindex(&self, id: Uuid, modified_time: Option<DateTime<Utc>>) -> Result<(), Error>;

    async fn set_file_preview_and_embedding(&self, id: Uuid, preview: String, embedding: Vec<f32>) -> Result<(), Error>;

    async fn delete_file(&self, id: Uuid) -> Result<(), Error>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Deletes existing chunks for `file_id` and inserts `chunks` in one
    /// transaction (spec.md §4.1 step 9, §9 Open Question #2).
    async fn replace_file_chunks(&self, file_id: Uuid, chunks: Vec<Chunk>) -> Result<(), Error>;

    async fn get_file_chunks(&self, file_id: Uuid) -> Result<Vec<Chunk>, Error>;

    async fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Chunk>, Error>;
}

#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: IndexingJob,
    pub file: File,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, folder_id: Uuid, file_id: Uuid, priority: i32) -> Result<IndexingJob, Error>;

    /// Creates a job for `file_id` unless a non-terminal one already
    /// exists (spec.md §4.2 "modified" branch: "enqueue ... unless one
    /// already exists").
    async fn ensure_job(&self, folder_id: Uuid, file_id: Uuid, priority: i32) -> Result<(), Error>;

    /// Atomic select-and-update with skip-locked semantics (spec.md §4.1
    /// Claim operation). Returns `None` if no eligible job exists.
    async fn claim_next_job(&self) -> Result<Option<ClaimedJob>, Error>;

    async fn complete_job(&self, job_id: Uuid) -> Result<(), Error>;

    /// Returns the job to Pending with `retry_after = now + delay`,
    /// keeping its attempt counter (spec.md §4.1 Retry policy).
    async fn requeue_job(&self, job_id: Uuid, retry_after: DateTime<Utc>, error: &str) -> Result<(), Error>;

    /// Marks the job terminally Failed (attempts exhausted or permanent
    /// error) without touching the DLQ table.
    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), Error>;

    async fn get_job(&self, id: Uuid) -> Result<IndexingJob, Error>;
}

#[async_trait]
pub trait FailedTaskStore: Send + Sync {
    /// Inserts a DLQ row, or updates one in place if `upstream_task_id`
    /// already has an entry (spec.md §3 FailedTask lifecycle).
    async fn upsert_failed_task(
        &self,
        upstream_task_id: Uuid,
        task_name: &str,
        args: serde_json::Value,
        exception_type: &str,
        message: &str,
        traceback: &str,
    ) -> Result<FailedTask, Error>;

    async fn list_failed_tasks(&self) -> Result<Vec<FailedTask>, Error>;

    async fn resolve_failed_task(&self, id: Uuid, notes: Option<String>) -> Result<(), Error>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, folder_id: Uuid, title: Option<String>) -> Result<Conversation, Error>;
    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, Error>;
    async fn list_conversations(&self, folder_id: Uuid) -> Result<Vec<Conversation>, Error>;
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, Error>;
    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: drivescout_core::model::MessageRole,
        content: &str,
        citations: std::collections::HashMap<String, drivescout_core::model::Citation>,
    ) -> Result<Message, Error>;
}
