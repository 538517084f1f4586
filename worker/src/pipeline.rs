//! Per-file ingest pipeline (spec.md §4.1 "Per-file ingest"): the body of
//! one claimed [`ClaimedJob`] from fetch through chunk-replace and folder
//! rollup, plus the failure classification, retry, and DLQ wiring around
//! it.
//!
//! Grounded on `original_source/backend/app/tasks/indexing.py` for the
//! step order (§9 names it the authoritative worker module over the
//! duplicated `worker.py`), re-expressed against this workspace's
//! repository traits instead of SQLAlchemy sessions.

use chrono::Utc;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::model::{Chunk, File, FileIndexStatus, IndexingJob, MimeClass};
use drivescout_core::oauth::TokenRefresher;
use drivescout_embeddings::embedder::Embedder;
use drivescout_ingestion::drive::DriveClient;
use drivescout_ingestion::extract::{self, VisionProvider};
use drivescout_ingestion::ocr::OcrProvider;
use drivescout_ingestion::{build_preview, chunk_blocks, PendingChunk};
use drivescout_llm::ChatClient;
use drivescout_storage::session::{resolve_access_token, TokenCrypto};
use drivescout_storage::traits::ClaimedJob;
use drivescout_storage::{ChunkStore, FailedTaskStore, FileStore, FolderStore, JobStore, SessionStore};
use std::sync::Arc;
use uuid::Uuid;

use crate::backoff;
use crate::contextualize::contextualize_chunks;

const EMBED_BATCH_SIZE: usize = 32;

/// Every capability a file ingest needs, bundled so the claim loop can pass
/// one value through instead of eight parameters.
pub struct PipelineDeps {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub folders: Arc<dyn FolderStore>,
    pub files: Arc<dyn FileStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub jobs: Arc<dyn JobStore>,
    pub dlq: Arc<dyn FailedTaskStore>,
    pub drive: Arc<dyn DriveClient>,
    pub ocr: Arc<dyn OcrProvider>,
    pub vision: Arc<dyn VisionProvider>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatClient>,
    pub token_refresher: Arc<dyn TokenRefresher>,
    pub token_crypto: Arc<dyn TokenCrypto>,
}

/// How a claimed job's ingest ended, for logging/testing -- the pipeline
/// itself has already applied every side effect (job/file/folder rows,
/// DLQ) by the time this returns.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Indexed { chunk_count: usize },
    Skipped { reason: &'static str },
    Retried { delay_secs: u64 },
    FailedPermanently { reason: String },
}

/// Runs the full per-file ingest for one claimed job and applies the
/// resulting job/file/folder/DLQ state transitions (spec.md §4.1 steps
/// 1-10, "Failure classification", "Retry policy", "Dead-letter queue").
pub async fn run_ingest(deps: &PipelineDeps, claimed: ClaimedJob) -> IngestOutcome {
    let ClaimedJob { job, file } = claimed;

    match ingest_file(deps, &file).await {
        Ok(chunk_count) => {
            complete(deps, job.id).await;
            recompute_progress(deps, file.folder_id).await;
            IngestOutcome::Indexed { chunk_count }
        }
        Err(PipelineError::Skip(reason)) => {
            set_file_skipped(deps, file.id).await;
            complete(deps, job.id).await;
            dead_letter(deps, &job, &format!("skipped: {reason}"), "Skipped").await;
            recompute_progress(deps, file.folder_id).await;
            IngestOutcome::Skipped { reason }
        }
        Err(PipelineError::Failed(err)) if err.is_retryable() && job.attempts < job.max_attempts => {
            let delay = backoff::delay_for_attempt(job.attempts);
            let retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            if let Err(e) = deps.jobs.requeue_job(job.id, retry_at, &err.to_string()).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to requeue job");
            }
            IngestOutcome::Retried { delay_secs: delay.as_secs() }
        }
        Err(PipelineError::Failed(err)) => {
            set_file_skipped(deps, file.id).await;
            if let Err(e) = deps.jobs.fail_job(job.id, &err.to_string()).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to mark job failed");
            }
            dead_letter(deps, &job, &err.to_string(), exception_type(&err)).await;
            recompute_progress(deps, file.folder_id).await;
            IngestOutcome::FailedPermanently { reason: err.to_string() }
        }
    }
}

async fn complete(deps: &PipelineDeps, job_id: Uuid) {
    if let Err(e) = deps.jobs.complete_job(job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "failed to mark job completed");
    }
}

async fn set_file_skipped(deps: &PipelineDeps, file_id: Uuid) {
    if let Err(e) = deps.files.set_file_status(file_id, FileIndexStatus::Skipped).await {
        tracing::error!(file_id = %file_id, error = %e, "failed to mark file skipped");
    }
}

/// An ingest attempt either fails with a classified [`Error`] (retryable or
/// not, per `Error::is_retryable`) or is skipped outright -- unsupported
/// mime types and oversized images are not errors, they're a file the
/// pipeline was never going to index (spec.md §4.1 step 3).
enum PipelineError {
    Skip(&'static str),
    Failed(Error),
}

impl From<Error> for PipelineError {
    fn from(e: Error) -> Self {
        PipelineError::Failed(e)
    }
}

fn exception_type(err: &Error) -> &'static str {
    match err {
        Error::Validation(_) => "ValidationError",
        Error::NotFound(_) => "NotFound",
        Error::Auth(_) => "AuthError",
        Error::Transient(_) => "TransientError",
        Error::Permanent(_) => "PermanentError",
        Error::Internal(_) => "InternalError",
    }
}

async fn recompute_progress(deps: &PipelineDeps, folder_id: Uuid) {
    if let Err(e) = deps.folders.recompute_folder_progress(folder_id).await {
        tracing::error!(folder_id = %folder_id, error = %e, "failed to recompute folder progress");
    }
}

/// Inserts or updates the DLQ row for `job`'s upstream task. DLQ failures
/// must never affect the main flow (spec.md §4.1 "Dead-letter queue"): any
/// error here is logged and swallowed.
async fn dead_letter(deps: &PipelineDeps, job: &IndexingJob, message: &str, exception_type: &str) {
    let args = serde_json::json!({ "folder_id": job.folder_id, "file_id": job.file_id });
    let result = deps
        .dlq
        .upsert_failed_task(job.id, "indexing.ingest_file", args, exception_type, message, message)
        .await;
    if let Err(e) = result {
        tracing::error!(job_id = %job.id, error = %e, "failed to write DLQ row");
    }
}

/// The actual per-file ingest (spec.md §4.1 steps 1-10), returning the
/// number of chunks persisted on success.
async fn ingest_file(deps: &PipelineDeps, file: &File) -> Result<usize, PipelineError> {
    let folder = deps.folders.get_folder(file.folder_id).await?;

    // Step 1: resolve an access token.
    let access_token = resolve_access_token(
        deps.sessions.as_ref(),
        deps.token_refresher.as_ref(),
        deps.token_crypto.as_ref(),
        folder.user_id,
    )
    .await?;

    // Step 2: the file row is already loaded -- a concurrent deletion
    // between claim and now surfaces as NotFound from the drive calls
    // below, which is a permanent error per spec.md §7.

    // Step 3: dispatch by mime type.
    let mime_class = MimeClass::classify(&file.mime_type);
    let content = match mime_class {
        MimeClass::GoogleDoc => {
            deps.drive.export_as(&file.remote_file_id, "text/html", &access_token).await?.into_bytes()
        }
        MimeClass::Pdf | MimeClass::Image | MimeClass::Spreadsheet => {
            deps.drive.download(&file.remote_file_id, &access_token).await?
        }
        MimeClass::Unsupported => return Err(PipelineError::Skip("unsupported_mime_type")),
    };

    if mime_class == MimeClass::Image && content.len() > drivescout_ingestion::MAX_IMAGE_SIZE_BYTES {
        return Err(PipelineError::Skip("image_too_large"));
    }

    let extracted = extract::extract(&deps.ocr, &deps.vision, &content, &file.name, &file.mime_type).await?;
    let Some(extracted) = extracted else {
        return Err(PipelineError::Skip("unsupported_mime_type"));
    };

    // Step 4: zero blocks -> Indexed with no chunks.
    if extracted.blocks.is_empty() {
        deps.files.set_file_status(file.id, FileIndexStatus::Indexed).await?;
        deps.chunks.replace_file_chunks(file.id, Vec::new()).await?;
        return Ok(0);
    }

    // Step 5: file preview + file-level embedding.
    let preview = build_preview(&extracted.blocks);
    let file_embedding = deps.embedder.embed(&preview).await?;

    // Step 6: chunk the blocks.
    let mut pending_chunks = chunk_blocks(&extracted.blocks);

    // Step 7: optional contextual enrichment.
    if deps.config.contextual_chunking_enabled {
        let full_text = extracted.blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n\n");
        pending_chunks = contextualize_chunks(deps.chat.as_ref(), &full_text, pending_chunks).await;
    }

    // Step 8: batch chunk embeddings, preserving chunk order.
    let chunk_embeddings = embed_in_batches(deps.embedder.as_ref(), &pending_chunks).await?;

    let chunks: Vec<Chunk> = pending_chunks
        .into_iter()
        .zip(chunk_embeddings)
        .enumerate()
        .map(|(index, (pending, embedding))| Chunk {
            id: Uuid::new_v4(),
            file_id: file.id,
            user_id: folder.user_id,
            chunk_text: pending.text,
            chunk_embedding: Some(embedding),
            location: pending.location,
            chunk_index: index as i32,
        })
        .collect();
    let chunk_count = chunks.len();

    // Step 9: persist preview/embedding, mark Indexed, replace chunks.
    deps.files.set_file_preview_and_embedding(file.id, preview, file_embedding).await?;
    deps.files.set_file_status(file.id, FileIndexStatus::Indexed).await?;
    deps.chunks.replace_file_chunks(file.id, chunks).await?;

    Ok(chunk_count)
}

async fn embed_in_batches(embedder: &dyn Embedder, chunks: &[PendingChunk]) -> Result<Vec<Vec<f32>>, Error> {
    let mut out = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        out.extend(embeddings);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use drivescout_core::model::{Folder, IndexStatus, Session};
    use drivescout_core::oauth::mock::MockTokenRefresher;
    use drivescout_embeddings::embedder::mock::MockEmbedder;
    use drivescout_ingestion::drive::mock::MockDriveClient;
    use drivescout_ingestion::drive::RemoteFile;
    use drivescout_llm::{ChatRequest, StreamEvent};
    use drivescout_storage::session::TokenCrypto as TokenCryptoTrait;
    use futures::stream::Stream;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::Mutex;

    struct PassthroughCrypto;
    impl TokenCryptoTrait for PassthroughCrypto {
        fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
            Ok(ciphertext.to_string())
        }
        fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
            Ok(plaintext.to_string())
        }
    }

    struct StubChat;
    #[async_trait]
    impl ChatClient for StubChat {
        async fn stream_chat(
            &self,
            _req: ChatRequest,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>, Error> {
            unimplemented!()
        }
        async fn chat_with_tools(&self, _req: drivescout_llm::ToolChatRequest) -> Result<drivescout_llm::ChatMessage, Error> {
            Ok(drivescout_llm::ChatMessage::assistant_text("a description".to_string()))
        }
    }

    struct StubVision;
    #[async_trait]
    impl VisionProvider for StubVision {
        async fn describe_image(&self, _bytes: &[u8], _media_type: &str, _file_name: &str) -> Result<String, Error> {
            Ok("a photo".to_string())
        }
    }

    #[derive(Default)]
    struct InMemory {
        folders: Mutex<HashMap<Uuid, Folder>>,
        files: Mutex<HashMap<Uuid, File>>,
        chunks: Mutex<HashMap<Uuid, Vec<Chunk>>>,
        jobs: Mutex<HashMap<Uuid, IndexingJob>>,
        sessions: Mutex<HashMap<Uuid, Session>>,
        dlq_writes: Mutex<usize>,
    }

    #[async_trait]
    impl FolderStore for InMemory {
        async fn create_folder(&self, _user_id: Uuid, _remote_folder_id: &str, _name: &str) -> Result<Folder, Error> {
            unimplemented!()
        }
        async fn get_folder(&self, id: Uuid) -> Result<Folder, Error> {
            self.folders.lock().unwrap().get(&id).cloned().ok_or_else(|| Error::NotFound("folder".into()))
        }
        async fn list_folders(&self, _user_id: Uuid) -> Result<Vec<Folder>, Error> {
            unimplemented!()
        }
        async fn delete_folder(&self, _id: Uuid) -> Result<(), Error> {
            unimplemented!()
        }
        async fn set_folder_error(&self, _id: Uuid, _reason: &str) -> Result<(), Error> {
            unimplemented!()
        }
        async fn set_folder_synced(&self, _id: Uuid, _files_total: i64, _synced_at: DateTime<Utc>) -> Result<(), Error> {
            unimplemented!()
        }
        async fn recompute_folder_progress(&self, id: Uuid) -> Result<Folder, Error> {
            Ok(self.folders.lock().unwrap().get(&id).cloned().unwrap())
        }
    }

    #[async_trait]
    impl FileStore for InMemory {
        async fn create_file(
            &self,
            _folder_id: Uuid,
            _remote_file_id: &str,
            _name: &str,
            _mime_type: &str,
            _modified_time: Option<DateTime<Utc>>,
        ) -> Result<File, Error> {
            unimplemented!()
        }
        async fn get_file(&self, id: Uuid) -> Result<File, Error> {
            self.files.lock().unwrap().get(&id).cloned().ok_or_else(|| Error::NotFound("file".into()))
        }
        async fn get_file_in_folder(&self, _folder_id: Uuid, _file_id: Uuid) -> Result<File, Error> {
            unimplemented!()
        }
        async fn list_files(&self, _folder_id: Uuid) -> Result<Vec<File>, Error> {
            unimplemented!()
        }
        async fn get_file_by_remote_id(&self, _folder_id: Uuid, _remote_file_id: &str) -> Result<Option<File>, Error> {
            unimplemented!()
        }
        async fn set_file_status(&self, id: Uuid, status: FileIndexStatus) -> Result<(), Error> {
            self.files.lock().unwrap().get_mut(&id).unwrap().index_status = status;
            Ok(())
        }
        async fn reset_file_for_reindex(&self, _id: Uuid, _modified_time: Option<DateTime<Utc>>) -> Result<(), Error> {
            unimplemented!()
        }
        async fn set_file_preview_and_embedding(&self, id: Uuid, preview: String, embedding: Vec<f32>) -> Result<(), Error> {
            let mut files = self.files.lock().unwrap();
            let file = files.get_mut(&id).unwrap();
            file.preview = Some(preview);
            file.embedding = Some(embedding);
            Ok(())
        }
        async fn delete_file(&self, _id: Uuid) -> Result<(), Error> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl ChunkStore for InMemory {
        async fn replace_file_chunks(&self, file_id: Uuid, chunks: Vec<Chunk>) -> Result<(), Error> {
            self.chunks.lock().unwrap().insert(file_id, chunks);
            Ok(())
        }
        async fn get_file_chunks(&self, file_id: Uuid) -> Result<Vec<Chunk>, Error> {
            Ok(self.chunks.lock().unwrap().get(&file_id).cloned().unwrap_or_default())
        }
        async fn get_chunks_by_ids(&self, _ids: &[Uuid]) -> Result<Vec<Chunk>, Error> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl JobStore for InMemory {
        async fn create_job(&self, _folder_id: Uuid, _file_id: Uuid, _priority: i32) -> Result<IndexingJob, Error> {
            unimplemented!()
        }
        async fn ensure_job(&self, _folder_id: Uuid, _file_id: Uuid, _priority: i32) -> Result<(), Error> {
            unimplemented!()
        }
        async fn claim_next_job(&self) -> Result<Option<ClaimedJob>, Error> {
            unimplemented!()
        }
        async fn complete_job(&self, job_id: Uuid) -> Result<(), Error> {
            self.jobs.lock().unwrap().get_mut(&job_id).unwrap().status = drivescout_core::model::JobStatus::Completed;
            Ok(())
        }
        async fn requeue_job(&self, job_id: Uuid, retry_after: DateTime<Utc>, error: &str) -> Result<(), Error> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&job_id).unwrap();
            job.retry_after = Some(retry_after);
            job.last_error = Some(error.to_string());
            Ok(())
        }
        async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), Error> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&job_id).unwrap();
            job.status = drivescout_core::model::JobStatus::Failed;
            job.last_error = Some(error.to_string());
            Ok(())
        }
        async fn get_job(&self, id: Uuid) -> Result<IndexingJob, Error> {
            self.jobs.lock().unwrap().get(&id).cloned().ok_or_else(|| Error::NotFound("job".into()))
        }
    }

    #[async_trait]
    impl FailedTaskStore for InMemory {
        async fn upsert_failed_task(
            &self,
            upstream_task_id: Uuid,
            _task_name: &str,
            _args: serde_json::Value,
            _exception_type: &str,
            _message: &str,
            _traceback: &str,
        ) -> Result<drivescout_core::model::FailedTask, Error> {
            *self.dlq_writes.lock().unwrap() += 1;
            Ok(drivescout_core::model::FailedTask {
                id: Uuid::new_v4(),
                upstream_task_id,
                task_name: "indexing.ingest_file".into(),
                args: serde_json::json!({}),
                exception_type: "x".into(),
                message: "x".into(),
                traceback: "x".into(),
                retries: 0,
                failed_at: Utc::now(),
                resolved_at: None,
                resolution_notes: None,
            })
        }
        async fn list_failed_tasks(&self) -> Result<Vec<drivescout_core::model::FailedTask>, Error> {
            unimplemented!()
        }
        async fn resolve_failed_task(&self, _id: Uuid, _notes: Option<String>) -> Result<(), Error> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl SessionStore for InMemory {
        async fn create_session(
            &self,
            _user_id: Uuid,
            _access_token_enc: String,
            _refresh_token_enc: String,
            _expires_at: DateTime<Utc>,
        ) -> Result<Session, Error> {
            unimplemented!()
        }
        async fn get_session_for_user(&self, user_id: Uuid) -> Result<Option<Session>, Error> {
            Ok(self.sessions.lock().unwrap().values().find(|s| s.user_id == user_id).cloned())
        }
        async fn get_session(&self, _id: Uuid) -> Result<Session, Error> {
            unimplemented!()
        }
        async fn update_session_tokens(
            &self,
            _id: Uuid,
            _access_token_enc: String,
            _refresh_token_enc: Option<String>,
            _expires_at: DateTime<Utc>,
        ) -> Result<Session, Error> {
            unimplemented!()
        }
        async fn delete_session(&self, _id: Uuid) -> Result<(), Error> {
            unimplemented!()
        }
    }

    fn make_deps(store: Arc<InMemory>, config: AppConfig, drive: MockDriveClient) -> PipelineDeps {
        PipelineDeps {
            config: Arc::new(config),
            sessions: store.clone(),
            folders: store.clone(),
            files: store.clone(),
            chunks: store.clone(),
            jobs: store.clone(),
            dlq: store.clone(),
            drive: Arc::new(drive),
            ocr: Arc::new(drivescout_ingestion::ocr::HttpOcrProvider::new(&test_config())),
            vision: Arc::new(StubVision),
            embedder: Arc::new(MockEmbedder),
            chat: Arc::new(StubChat),
            token_refresher: Arc::new(MockTokenRefresher::failing()),
            token_crypto: Arc::new(PassthroughCrypto),
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".into(),
            redis_url: None,
            secret_key: "secret".into(),
            session_expire_hours: 24,
            worker_concurrency: 1,
            max_request_size_bytes: 1024,
            max_chat_message_length: 1000,
            max_conversation_title_length: 255,
            sync_interval: std::time::Duration::from_secs(1),
            job_soft_deadline: std::time::Duration::from_secs(1),
            job_hard_deadline: std::time::Duration::from_secs(1),
            db_pool_size: 1,
            db_max_overflow: 1,
            db_pool_recycle_secs: 1,
            db_pool_timeout: std::time::Duration::from_secs(1),
            db_statement_timeout_ms: 1,
            contextual_chunking_enabled: false,
            claude_model: "claude".into(),
            claude_fast_model: "claude-fast".into(),
            posthog_enabled: false,
            posthog_api_key: None,
            posthog_host: None,
            drive_api_base_url: "http://drive.test".into(),
            llm_api_base_url: "http://llm.test".into(),
            llm_api_key: "k".into(),
            embedder_api_base_url: "http://embed.test".into(),
            embedder_api_key: "k".into(),
            reranker_api_base_url: "http://rerank.test".into(),
            reranker_api_key: "k".into(),
            ocr_api_base_url: "http://ocr.test".into(),
            ocr_api_key: "k".into(),
            http_timeout_standard: std::time::Duration::from_secs(1),
            http_timeout_ocr: std::time::Duration::from_secs(1),
        }
    }

    fn claimed_job(folder_id: Uuid, file_id: Uuid, mime_type: &str, attempts: i32) -> ClaimedJob {
        ClaimedJob {
            job: IndexingJob {
                id: Uuid::new_v4(),
                folder_id,
                file_id,
                status: drivescout_core::model::JobStatus::Processing,
                priority: 0,
                attempts,
                max_attempts: 5,
                last_error: None,
                retry_after: None,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
            },
            file: File {
                id: file_id,
                folder_id,
                remote_file_id: "remote-1".into(),
                name: "doc.txt".into(),
                mime_type: mime_type.to_string(),
                modified_time: None,
                preview: None,
                embedding: None,
                index_status: FileIndexStatus::Pending,
            },
        }
    }

    fn setup(mime_type: &str, attempts: i32) -> (Arc<InMemory>, ClaimedJob) {
        let user_id = Uuid::new_v4();
        let folder_id = Uuid::new_v4();
        let file_id = Uuid::new_v4();
        let store = Arc::new(InMemory::default());
        store.folders.lock().unwrap().insert(
            folder_id,
            Folder {
                id: folder_id,
                user_id,
                remote_folder_id: "rf".into(),
                name: "Folder".into(),
                index_status: IndexStatus::Indexing,
                files_total: 1,
                files_indexed: 0,
                last_synced_at: None,
            },
        );
        store.sessions.lock().unwrap().insert(
            Uuid::new_v4(),
            Session {
                id: Uuid::new_v4(),
                user_id,
                access_token_enc: "token".into(),
                refresh_token_enc: "refresh".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            },
        );
        let claimed = claimed_job(folder_id, file_id, mime_type, attempts);
        store.files.lock().unwrap().insert(file_id, claimed.file.clone());
        store.jobs.lock().unwrap().insert(claimed.job.id, claimed.job.clone());
        (store, claimed)
    }

    #[tokio::test]
    async fn unsupported_mime_is_skipped_not_failed() {
        let (store, claimed) = setup("application/x-made-up", 0);
        let deps = make_deps(store.clone(), test_config(), MockDriveClient::default());
        let outcome = run_ingest(&deps, claimed.clone()).await;
        assert_eq!(outcome, IngestOutcome::Skipped { reason: "unsupported_mime_type" });
        assert_eq!(store.files.lock().unwrap().get(&claimed.file.id).unwrap().index_status, FileIndexStatus::Skipped);
        assert_eq!(*store.dlq_writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn google_doc_is_indexed_with_chunks() {
        let (store, claimed) = setup("application/vnd.google-apps.document", 0);
        let mock_drive = MockDriveClient::default();
        mock_drive.exports.lock().unwrap().insert(
            "remote-1".into(),
            "<h1>Heading</h1><p>".to_string() + &"Some body text that is long enough. ".repeat(10) + "</p>",
        );
        let deps = make_deps(store.clone(), test_config(), mock_drive);
        let outcome = run_ingest(&deps, claimed.clone()).await;
        match outcome {
            IngestOutcome::Indexed { chunk_count } => assert!(chunk_count >= 1),
            other => panic!("expected Indexed, got {other:?}"),
        }
        assert_eq!(store.files.lock().unwrap().get(&claimed.file.id).unwrap().index_status, FileIndexStatus::Indexed);
        assert!(!store.chunks.lock().unwrap().get(&claimed.file.id).unwrap().is_empty());
    }

    struct TransientDrive;
    #[async_trait]
    impl DriveClient for TransientDrive {
        async fn list_files(
            &self,
            _folder_id: &str,
            _page_token: Option<&str>,
            _access_token: &str,
        ) -> Result<(Vec<RemoteFile>, Option<String>), Error> {
            unimplemented!()
        }
        async fn get_file_metadata(&self, _file_id: &str, _access_token: &str) -> Result<RemoteFile, Error> {
            unimplemented!()
        }
        async fn export_as(&self, _file_id: &str, _mime_type: &str, _access_token: &str) -> Result<String, Error> {
            Err(Error::Transient("drive unavailable".into()))
        }
        async fn download(&self, _file_id: &str, _access_token: &str) -> Result<Vec<u8>, Error> {
            Err(Error::Transient("drive unavailable".into()))
        }
    }

    #[tokio::test]
    async fn transient_drive_failure_is_retried_while_attempts_remain() {
        let (store, claimed) = setup("application/pdf", 0);
        let config = AppConfig { worker_concurrency: 1, ..test_config() };
        let mut deps = make_deps(store.clone(), config, MockDriveClient::default());
        deps.drive = Arc::new(TransientDrive);
        let outcome = run_ingest(&deps, claimed.clone()).await;
        match outcome {
            IngestOutcome::Retried { .. } => {}
            other => panic!("expected Retried, got {other:?}"),
        }
        let job = store.jobs.lock().unwrap().get(&claimed.job.id).unwrap().clone();
        assert!(job.retry_after.is_some());
    }

    #[tokio::test]
    async fn transient_drive_failure_fails_permanently_once_attempts_exhausted() {
        let (store, claimed) = setup("application/pdf", 5);
        let mut deps = make_deps(store.clone(), test_config(), MockDriveClient::default());
        deps.drive = Arc::new(TransientDrive);
        let outcome = run_ingest(&deps, claimed.clone()).await;
        assert!(matches!(outcome, IngestOutcome::FailedPermanently { .. }));
        assert_eq!(
            store.jobs.lock().unwrap().get(&claimed.job.id).unwrap().status,
            drivescout_core::model::JobStatus::Failed
        );
        assert_eq!(*store.dlq_writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn not_found_file_is_failed_permanently_without_retry() {
        let (store, claimed) = setup("application/pdf", 0);
        let deps = make_deps(store.clone(), test_config(), MockDriveClient::default());
        let outcome = run_ingest(&deps, claimed.clone()).await;
        assert!(matches!(outcome, IngestOutcome::FailedPermanently { .. }));
    }
}
