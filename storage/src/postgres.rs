//! `PgStore`: the sole Postgres-backed implementation of every repository
//! trait in `traits`, grounded on the `VectorStore`-shaped async struct in
//! the teacher's `backend/storage/src/lib.rs` (there wrapping a LanceDB
//! connection; here wrapping an `sqlx::PgPool` per SPEC_FULL §6.3).
//!
//! Assumed schema: `users`, `sessions`, `folders`, `files`, `chunks`,
//! `conversations`, `messages`, `indexing_jobs`, `failed_tasks`, per
//! spec.md §6 "Persisted state layout" (migrations are an out-of-scope
//! collaborator; this module only issues DML).

use crate::traits::{
    ChunkStore, ClaimedJob, ConversationStore, FailedTaskStore, FileStore, FolderStore, JobStore, SessionStore,
    UserStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drivescout_core::error::Error;
use drivescout_core::model::{
    Chunk, Citation, Conversation, FailedTask, File, FileIndexStatus, Folder, IndexStatus, IndexingJob, JobStatus,
    Location, Message, MessageRole, Session, User,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn embedding_to_vec(v: Option<pgvector::Vector>) -> Option<Vec<f32>> {
    v.map(|v| v.to_vec())
}

fn file_from_row(row: &PgRow) -> Result<File, Error> {
    let status: String = row.try_get("index_status")?;
    Ok(File {
        id: row.try_get("id")?,
        folder_id: row.try_get("folder_id")?,
        remote_file_id: row.try_get("remote_file_id")?,
        name: row.try_get("name")?,
        mime_type: row.try_get("mime_type")?,
        modified_time: row.try_get("modified_time")?,
        preview: row.try_get("preview")?,
        embedding: embedding_to_vec(row.try_get("embedding")?),
        index_status: parse_file_status(&status)?,
    })
}

fn parse_file_status(s: &str) -> Result<FileIndexStatus, Error> {
    Ok(match s {
        "pending" => FileIndexStatus::Pending,
        "indexed" => FileIndexStatus::Indexed,
        "skipped" => FileIndexStatus::Skipped,
        "failed" => FileIndexStatus::Failed,
        other => return Err(Error::Internal(anyhow::anyhow!("unknown file status {other}"))),
    })
}

fn chunk_from_row(row: &PgRow) -> Result<Chunk, Error> {
    let location_json: serde_json::Value = row.try_get("location")?;
    let location: Location = serde_json::from_value(location_json)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad location json: {e}")))?;
    Ok(Chunk {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        user_id: row.try_get("user_id")?,
        chunk_text: row.try_get("chunk_text")?,
        chunk_embedding: embedding_to_vec(row.try_get("chunk_embedding")?),
        location,
        chunk_index: row.try_get("chunk_index")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<IndexingJob, Error> {
    let status: String = row.try_get("status")?;
    Ok(IndexingJob {
        id: row.try_get("id")?,
        folder_id: row.try_get("folder_id")?,
        file_id: row.try_get("file_id")?,
        status: parse_job_status(&status)?,
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        last_error: row.try_get("last_error")?,
        retry_after: row.try_get("retry_after")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn parse_job_status(s: &str) -> Result<JobStatus, Error> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "processing" => JobStatus::Processing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        other => return Err(Error::Internal(anyhow::anyhow!("unknown job status {other}"))),
    })
}

fn folder_from_row(row: &PgRow) -> Result<Folder, Error> {
    let status: String = row.try_get("index_status")?;
    Ok(Folder {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        remote_folder_id: row.try_get("remote_folder_id")?,
        name: row.try_get("name")?,
        index_status: parse_folder_status(&status)?,
        files_total: row.try_get("files_total")?,
        files_indexed: row.try_get("files_indexed")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn parse_folder_status(s: &str) -> Result<IndexStatus, Error> {
    Ok(match s {
        "pending" => IndexStatus::Pending,
        "indexing" => IndexStatus::Indexing,
        "ready" => IndexStatus::Ready,
        "error" => IndexStatus::Error,
        other => return Err(Error::Internal(anyhow::anyhow!("unknown folder status {other}"))),
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_or_create_user(&self, external_id: &str, email: &str) -> Result<User, Error> {
        let row = sqlx::query(
            "INSERT INTO users (id, external_id, email, created_at) VALUES ($1, $2, $3, now())
             ON CONFLICT (external_id) DO UPDATE SET email = EXCLUDED.email
             RETURNING id, external_id, email, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(User {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn get_user(&self, id: Uuid) -> Result<User, Error> {
        let row = sqlx::query("SELECT id, external_id, email, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(User {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn session_from_row(row: &PgRow) -> Result<Session, Error> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        access_token_enc: row.try_get("access_token_enc")?,
        refresh_token_enc: row.try_get("refresh_token_enc")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        access_token_enc: String,
        refresh_token_enc: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, Error> {
        let row = sqlx::query(
            "INSERT INTO sessions (id, user_id, access_token_enc, refresh_token_enc, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, user_id, access_token_enc, refresh_token_enc, expires_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        session_from_row(&row)
    }

    async fn get_session_for_user(&self, user_id: Uuid) -> Result<Option<Session>, Error> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token_enc, refresh_token_enc, expires_at FROM sessions
             WHERE user_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, Error> {
        let row = sqlx::query(
            "SELECT id, user_id, access_token_enc, refresh_token_enc, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        session_from_row(&row)
    }

    async fn update_session_tokens(
        &self,
        id: Uuid,
        access_token_enc: String,
        refresh_token_enc: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, Error> {
        let row = sqlx::query(
            "UPDATE sessions SET access_token_enc = $2,
                refresh_token_enc = COALESCE($3, refresh_token_enc),
                expires_at = $4
             WHERE id = $1
             RETURNING id, user_id, access_token_enc, refresh_token_enc, expires_at",
        )
        .bind(id)
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        session_from_row(&row)
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM sessions WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FolderStore for PgStore {
    async fn create_folder(&self, user_id: Uuid, remote_folder_id: &str, name: &str) -> Result<Folder, Error> {
        let row = sqlx::query(
            "INSERT INTO folders (id, user_id, remote_folder_id, name, index_status, files_total, files_indexed)
             VALUES ($1, $2, $3, $4, 'pending', 0, 0)
             RETURNING id, user_id, remote_folder_id, name, index_status, files_total, files_indexed, last_synced_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(remote_folder_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        folder_from_row(&row)
    }

    async fn get_folder(&self, id: Uuid) -> Result<Folder, Error> {
        let row = sqlx::query(
            "SELECT id, user_id, remote_folder_id, name, index_status, files_total, files_indexed, last_synced_at
             FROM folders WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        folder_from_row(&row)
    }

    async fn list_folders(&self, user_id: Uuid) -> Result<Vec<Folder>, Error> {
        let rows = sqlx::query(
            "SELECT id, user_id, remote_folder_id, name, index_status, files_total, files_indexed, last_synced_at
             FROM folders WHERE user_id = $1 ORDER BY name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(folder_from_row).collect()
    }

    async fn delete_folder(&self, id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM folders WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn set_folder_error(&self, id: Uuid, reason: &str) -> Result<(), Error> {
        sqlx::query("UPDATE folders SET index_status = 'error' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::warn!(folder_id = %id, reason, "folder sync error");
        Ok(())
    }

    async fn set_folder_synced(&self, id: Uuid, files_total: i64, synced_at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE folders SET files_total = $2, last_synced_at = $3 WHERE id = $1")
            .bind(id)
            .bind(files_total)
            .bind(synced_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recompute_folder_progress(&self, id: Uuid) -> Result<Folder, Error> {
        let counts = sqlx::query(
            "SELECT count(*) FILTER (WHERE index_status IN ('indexed', 'skipped')) AS indexed, count(*) AS total
             FROM files WHERE folder_id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let files_indexed: i64 = counts.try_get("indexed")?;
        let files_total: i64 = counts.try_get("total")?;
        let status = Folder::rollup_status(files_indexed, files_total);
        let status_str = match status {
            IndexStatus::Ready => "ready",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Pending => "pending",
            IndexStatus::Error => "error",
        };
        let row = sqlx::query(
            "UPDATE folders SET files_indexed = $2, index_status = $3 WHERE id = $1
             RETURNING id, user_id, remote_folder_id, name, index_status, files_total, files_indexed, last_synced_at",
        )
        .bind(id)
        .bind(files_indexed)
        .bind(status_str)
        .fetch_one(&self.pool)
        .await?;
        folder_from_row(&row)
    }
}

#[async_trait]
impl FileStore for PgStore {
    async fn create_file(
        &self,
        folder_id: Uuid,
        remote_file_id: &str,
        name: &str,
        mime_type: &str,
        modified_time: Option<DateTime<Utc>>,
    ) -> Result<File, Error> {
        let row = sqlx::query(
            "INSERT INTO files (id, folder_id, remote_file_id, name, mime_type, modified_time, index_status)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending')
             RETURNING id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status",
        )
        .bind(Uuid::new_v4())
        .bind(folder_id)
        .bind(remote_file_id)
        .bind(name)
        .bind(mime_type)
        .bind(modified_time)
        .fetch_one(&self.pool)
        .await?;
        file_from_row(&row)
    }

    async fn get_file(&self, id: Uuid) -> Result<File, Error> {
        let row = sqlx::query(
            "SELECT id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status
             FROM files WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        file_from_row(&row)
    }

    async fn get_file_in_folder(&self, folder_id: Uuid, file_id: Uuid) -> Result<File, Error> {
        let row = sqlx::query(
            "SELECT id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status
             FROM files WHERE id = $1 AND folder_id = $2",
        )
        .bind(file_id)
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("file {file_id} in folder {folder_id}")))?;
        file_from_row(&row)
    }

    async fn list_files(&self, folder_id: Uuid) -> Result<Vec<File>, Error> {
        let rows = sqlx::query(
            "SELECT id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status
             FROM files WHERE folder_id = $1 ORDER BY name",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    async fn get_file_by_remote_id(&self, folder_id: Uuid, remote_file_id: &str) -> Result<Option<File>, Error> {
        let row = sqlx::query(
            "SELECT id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status
             FROM files WHERE folder_id = $1 AND remote_file_id = $2",
        )
        .bind(folder_id)
        .bind(remote_file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn set_file_status(&self, id: Uuid, status: FileIndexStatus) -> Result<(), Error> {
        let status_str = match status {
            FileIndexStatus::Pending => "pending",
            FileIndexStatus::Indexed => "indexed",
            FileIndexStatus::Skipped => "skipped",
            FileIndexStatus::Failed => "failed",
        };
        sqlx::query("UPDATE files SET index_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status_str)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_file_for_reindex(&self, id: Uuid, modified_time: Option<DateTime<Utc>>) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query(
            "UPDATE files SET preview = NULL, embedding = NULL, index_status = 'pending', modified_time = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(modified_time)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_file_preview_and_embedding(&self, id: Uuid, preview: String, embedding: Vec<f32>) -> Result<(), Error> {
        sqlx::query("UPDATE files SET preview = $2, embedding = $3, index_status = 'indexed' WHERE id = $1")
            .bind(id)
            .bind(preview)
            .bind(pgvector::Vector::from(embedding))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, id: Uuid) -> Result<(), Error> {
        sqlx::query("DELETE FROM files WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for PgStore {
    async fn replace_file_chunks(&self, file_id: Uuid, chunks: Vec<Chunk>) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = $1").bind(file_id).execute(&mut *tx).await?;
        for chunk in &chunks {
            let location_json = serde_json::to_value(&chunk.location)
                .map_err(|e| Error::Internal(anyhow::anyhow!("failed to serialize location: {e}")))?;
            sqlx::query(
                "INSERT INTO chunks (id, file_id, user_id, chunk_text, chunk_embedding, location, chunk_index, search_vector)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, to_tsvector('english', $4))",
            )
            .bind(chunk.id)
            .bind(chunk.file_id)
            .bind(chunk.user_id)
            .bind(&chunk.chunk_text)
            .bind(chunk.chunk_embedding.clone().map(pgvector::Vector::from))
            .bind(location_json)
            .bind(chunk.chunk_index)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_file_chunks(&self, file_id: Uuid) -> Result<Vec<Chunk>, Error> {
        let rows = sqlx::query(
            "SELECT id, file_id, user_id, chunk_text, chunk_embedding, location, chunk_index
             FROM chunks WHERE file_id = $1 ORDER BY chunk_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Chunk>, Error> {
        let rows = sqlx::query(
            "SELECT id, file_id, user_id, chunk_text, chunk_embedding, location, chunk_index
             FROM chunks WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, folder_id: Uuid, file_id: Uuid, priority: i32) -> Result<IndexingJob, Error> {
        let row = sqlx::query(
            "INSERT INTO indexing_jobs (id, folder_id, file_id, status, priority, attempts, max_attempts, created_at)
             VALUES ($1, $2, $3, 'pending', $4, 0, $5, now())
             RETURNING id, folder_id, file_id, status, priority, attempts, max_attempts, last_error, retry_after,
                       created_at, started_at, completed_at",
        )
        .bind(Uuid::new_v4())
        .bind(folder_id)
        .bind(file_id)
        .bind(priority)
        .bind(IndexingJob::DEFAULT_MAX_ATTEMPTS)
        .fetch_one(&self.pool)
        .await?;
        job_from_row(&row)
    }

    async fn ensure_job(&self, folder_id: Uuid, file_id: Uuid, priority: i32) -> Result<(), Error> {
        let existing = sqlx::query(
            "SELECT id FROM indexing_jobs WHERE file_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_none() {
            self.create_job(folder_id, file_id, priority).await?;
        }
        Ok(())
    }

    async fn claim_next_job(&self) -> Result<Option<ClaimedJob>, Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id, folder_id, file_id, status, priority, attempts, max_attempts, last_error, retry_after,
                    created_at, started_at, completed_at
             FROM indexing_jobs
             WHERE status = 'pending' AND (retry_after IS NULL OR retry_after <= now()) AND attempts < max_attempts
             ORDER BY priority DESC, created_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let job_id: Uuid = row.try_get("id")?;
        let updated = sqlx::query(
            "UPDATE indexing_jobs SET status = 'processing', attempts = attempts + 1, started_at = now(),
                retry_after = NULL
             WHERE id = $1
             RETURNING id, folder_id, file_id, status, priority, attempts, max_attempts, last_error, retry_after,
                       created_at, started_at, completed_at",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        let job = job_from_row(&updated)?;
        let file_row = sqlx::query(
            "SELECT id, folder_id, remote_file_id, name, mime_type, modified_time, preview, embedding, index_status
             FROM files WHERE id = $1",
        )
        .bind(job.file_id)
        .fetch_one(&mut *tx)
        .await?;
        let file = file_from_row(&file_row)?;
        tx.commit().await?;
        Ok(Some(ClaimedJob { job, file }))
    }

    async fn complete_job(&self, job_id: Uuid) -> Result<(), Error> {
        sqlx::query("UPDATE indexing_jobs SET status = 'completed', completed_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue_job(&self, job_id: Uuid, retry_after: DateTime<Utc>, error: &str) -> Result<(), Error> {
        sqlx::query("UPDATE indexing_jobs SET status = 'pending', retry_after = $2, last_error = $3 WHERE id = $1")
            .bind(job_id)
            .bind(retry_after)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), Error> {
        sqlx::query(
            "UPDATE indexing_jobs SET status = 'failed', last_error = $2, completed_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<IndexingJob, Error> {
        let row = sqlx::query(
            "SELECT id, folder_id, file_id, status, priority, attempts, max_attempts, last_error, retry_after,
                    created_at, started_at, completed_at
             FROM indexing_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        job_from_row(&row)
    }
}

fn failed_task_from_row(row: &PgRow) -> Result<FailedTask, Error> {
    Ok(FailedTask {
        id: row.try_get("id")?,
        upstream_task_id: row.try_get("upstream_task_id")?,
        task_name: row.try_get("task_name")?,
        args: row.try_get("args")?,
        exception_type: row.try_get("exception_type")?,
        message: row.try_get("message")?,
        traceback: row.try_get("traceback")?,
        retries: row.try_get("retries")?,
        failed_at: row.try_get("failed_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolution_notes: row.try_get("resolution_notes")?,
    })
}

#[async_trait]
impl FailedTaskStore for PgStore {
    async fn upsert_failed_task(
        &self,
        upstream_task_id: Uuid,
        task_name: &str,
        args: serde_json::Value,
        exception_type: &str,
        message: &str,
        traceback: &str,
    ) -> Result<FailedTask, Error> {
        let row = sqlx::query(
            "INSERT INTO failed_tasks (id, upstream_task_id, task_name, args, exception_type, message, traceback,
                retries, failed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, now())
             ON CONFLICT (upstream_task_id) DO UPDATE SET
                message = EXCLUDED.message,
                traceback = EXCLUDED.traceback,
                exception_type = EXCLUDED.exception_type,
                retries = failed_tasks.retries + 1,
                failed_at = now()
             RETURNING id, upstream_task_id, task_name, args, exception_type, message, traceback, retries,
                       failed_at, resolved_at, resolution_notes",
        )
        .bind(Uuid::new_v4())
        .bind(upstream_task_id)
        .bind(task_name)
        .bind(args)
        .bind(exception_type)
        .bind(message)
        .bind(traceback)
        .fetch_one(&self.pool)
        .await?;
        failed_task_from_row(&row)
    }

    async fn list_failed_tasks(&self) -> Result<Vec<FailedTask>, Error> {
        let rows = sqlx::query(
            "SELECT id, upstream_task_id, task_name, args, exception_type, message, traceback, retries,
                    failed_at, resolved_at, resolution_notes
             FROM failed_tasks ORDER BY failed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(failed_task_from_row).collect()
    }

    async fn resolve_failed_task(&self, id: Uuid, notes: Option<String>) -> Result<(), Error> {
        sqlx::query("UPDATE failed_tasks SET resolved_at = now(), resolution_notes = $2 WHERE id = $1")
            .bind(id)
            .bind(notes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn message_from_row(row: &PgRow) -> Result<Message, Error> {
    let role: String = row.try_get("role")?;
    let citations_json: serde_json::Value = row.try_get("citations")?;
    let citations: HashMap<String, Citation> = serde_json::from_value(citations_json)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad citations json: {e}")))?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: if role == "user" { MessageRole::User } else { MessageRole::Assistant },
        content: row.try_get("content")?,
        citations,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_conversation(&self, folder_id: Uuid, title: Option<String>) -> Result<Conversation, Error> {
        let row = sqlx::query(
            "INSERT INTO conversations (id, folder_id, title, created_at) VALUES ($1, $2, $3, now())
             RETURNING id, folder_id, title, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(folder_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(Conversation {
            id: row.try_get("id")?,
            folder_id: row.try_get("folder_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Conversation, Error> {
        let row = sqlx::query("SELECT id, folder_id, title, created_at FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Conversation {
            id: row.try_get("id")?,
            folder_id: row.try_get("folder_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn list_conversations(&self, folder_id: Uuid) -> Result<Vec<Conversation>, Error> {
        let rows = sqlx::query(
            "SELECT id, folder_id, title, created_at FROM conversations WHERE folder_id = $1 ORDER BY created_at DESC",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Conversation {
                    id: row.try_get("id")?,
                    folder_id: row.try_get("folder_id")?,
                    title: row.try_get("title")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, Error> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, citations, created_at
             FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        citations: HashMap<String, Citation>,
    ) -> Result<Message, Error> {
        let role_str = match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        let citations_json = serde_json::to_value(&citations)
            .map_err(|e| Error::Internal(anyhow::anyhow!("failed to serialize citations: {e}")))?;
        let row = sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, citations, created_at)
             VALUES ($1, $2, $3, $4, $5, now())
             RETURNING id, conversation_id, role, content, citations, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role_str)
        .bind(content)
        .bind(citations_json)
        .fetch_one(&self.pool)
        .await?;
        message_from_row(&row)
    }
}
