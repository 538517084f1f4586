//! Diff-based folder synchronizer (spec.md §4.2): reconciles the set of
//! remote files visible in a drive folder with the set of `File` rows held
//! locally, throttled to one upstream listing per `SYNC_INTERVAL`.
//!
//! Grounded on `ingestion::drive::list_all_files` for the paginated remote
//! listing and on the `storage::traits` repository traits for the diff
//! writes; the three-way added/modified/deleted split mirrors the shape of
//! `examples/original_source/backend/app/services/folder_sync.py` (not
//! copied verbatim -- that file is SQLAlchemy-specific).

use chrono::Utc;
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::model::{Folder, IndexingJob};
use drivescout_ingestion::drive::{list_all_files, DriveClient, RemoteFile};
use drivescout_storage::{FileStore, FolderStore, JobStore};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of a single [`sync_folder`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Skipped because `last_synced_at` is within `SYNC_INTERVAL`.
    SkippedRecentSync,
    /// Upstream listing failed; the folder was marked `Error` with `reason`.
    Failed { reason: &'static str },
    /// Diff applied; counts are informational only.
    Synced { added: usize, modified: usize, deleted: usize },
}

/// Classifies an upstream failure into the folder-level error reason spec.md
/// §4.2 names, by inspecting the formatted error -- `Error::Transient`/
/// `Error::Permanent` carry the upstream HTTP status in their message (see
/// `drivescout_core::error::Error`'s `From<reqwest::Error>`), since the
/// error taxonomy does not itself carry a status code field.
fn classify_sync_error(err: &Error) -> &'static str {
    let msg = err.to_string();
    if msg.contains("404") {
        "folder_not_found"
    } else if msg.contains("403") {
        "permission_denied"
    } else if msg.contains("429") {
        "rate_limited"
    } else {
        "api_error"
    }
}

/// Runs the throttle + diff + write for one folder (spec.md §4.2).
pub async fn sync_folder(
    config: &AppConfig,
    drive: &dyn DriveClient,
    folders: &dyn FolderStore,
    files: &dyn FileStore,
    jobs: &dyn JobStore,
    folder: &Folder,
    access_token: &str,
) -> Result<SyncOutcome, Error> {
    if let Some(last_synced_at) = folder.last_synced_at {
        let elapsed = Utc::now() - last_synced_at;
        if elapsed.to_std().unwrap_or_default() < config.sync_interval {
            return Ok(SyncOutcome::SkippedRecentSync);
        }
    }

    let remote_files = match list_all_files(drive, &folder.remote_folder_id, access_token).await {
        Ok(files) => files,
        Err(e) => {
            let reason = classify_sync_error(&e);
            folders.set_folder_error(folder.id, reason).await?;
            return Ok(SyncOutcome::Failed { reason });
        }
    };

    let stored_files = files.list_files(folder.id).await?;
    let stored_by_remote_id: HashMap<&str, &drivescout_core::model::File> =
        stored_files.iter().map(|f| (f.remote_file_id.as_str(), f)).collect();
    let remote_by_id: HashMap<&str, &RemoteFile> = remote_files.iter().map(|f| (f.id.as_str(), f)).collect();

    let mut added = 0usize;
    let mut modified = 0usize;
    let mut deleted = 0usize;

    for remote in &remote_files {
        match stored_by_remote_id.get(remote.id.as_str()) {
            None => {
                let created = files
                    .create_file(folder.id, &remote.id, &remote.name, &remote.mime_type, remote.modified_time)
                    .await?;
                jobs.ensure_job(folder.id, created.id, IndexingJob::DEFAULT_PRIORITY).await?;
                added += 1;
            }
            Some(stored) => {
                let is_newer = match (remote.modified_time, stored.modified_time) {
                    (Some(remote_mtime), Some(stored_mtime)) => remote_mtime > stored_mtime,
                    (Some(_), None) => true,
                    _ => false,
                };
                if is_newer {
                    files.reset_file_for_reindex(stored.id, remote.modified_time).await?;
                    jobs.ensure_job(folder.id, stored.id, IndexingJob::DEFAULT_PRIORITY).await?;
                    modified += 1;
                }
            }
        }
    }

    for stored in &stored_files {
        if !remote_by_id.contains_key(stored.remote_file_id.as_str()) {
            files.delete_file(stored.id).await?;
            deleted += 1;
        }
    }

    folders.set_folder_synced(folder.id, remote_files.len() as i64, Utc::now()).await?;
    folders.recompute_folder_progress(folder.id).await?;

    Ok(SyncOutcome::Synced { added, modified, deleted })
}

/// Syncs every folder owned by `user_id`, logging (not propagating) any
/// per-folder failure so one bad folder never blocks the rest.
pub async fn sync_all_folders_for_user(
    config: &AppConfig,
    drive: &dyn DriveClient,
    folders: &dyn FolderStore,
    files: &dyn FileStore,
    jobs: &dyn JobStore,
    user_id: Uuid,
    access_token: &str,
) -> Result<Vec<(Uuid, SyncOutcome)>, Error> {
    let owned = folders.list_folders(user_id).await?;
    let mut results = Vec::with_capacity(owned.len());
    for folder in owned {
        let folder_id = folder.id;
        match sync_folder(config, drive, folders, files, jobs, &folder, access_token).await {
            Ok(outcome) => results.push((folder_id, outcome)),
            Err(e) => {
                tracing::warn!(folder_id = %folder_id, error = %e, "folder sync failed");
                results.push((folder_id, SyncOutcome::Failed { reason: "api_error" }));
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivescout_core::model::{FileIndexStatus, IndexStatus};
    use std::sync::Mutex;

    /// Local test double for `DriveClient`: the crate's own mock is
    /// `#[cfg(test)]`-gated and so not visible outside `drivescout-ingestion`.
    #[derive(Default)]
    struct StubDriveClient {
        files: Mutex<Vec<RemoteFile>>,
    }

    #[async_trait::async_trait]
    impl DriveClient for StubDriveClient {
        async fn list_files(
            &self,
            _folder_id: &str,
            _page_token: Option<&str>,
            _access_token: &str,
        ) -> Result<(Vec<RemoteFile>, Option<String>), Error> {
            Ok((self.files.lock().unwrap().clone(), None))
        }
        async fn get_file_metadata(&self, _file_id: &str, _access_token: &str) -> Result<RemoteFile, Error> {
            unimplemented!()
        }
        async fn export_as(&self, _file_id: &str, _mime_type: &str, _access_token: &str) -> Result<String, Error> {
            unimplemented!()
        }
        async fn download(&self, _file_id: &str, _access_token: &str) -> Result<Vec<u8>, Error> {
            unimplemented!()
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database_url: String::new(),
            redis_url: None,
            secret_key: "k".into(),
            session_expire_hours: 24,
            worker_concurrency: 1,
            max_request_size_bytes: 1024,
            max_chat_message_length: 1024,
            max_conversation_title_length: 255,
            sync_interval: std::time::Duration::from_secs(3600),
            job_soft_deadline: std::time::Duration::from_secs(840),
            job_hard_deadline: std::time::Duration::from_secs(900),
            db_pool_size: 1,
            db_max_overflow: 0,
            db_pool_recycle_secs: 1800,
            db_pool_timeout: std::time::Duration::from_secs(30),
            db_statement_timeout_ms: 30_000,
            contextual_chunking_enabled: false,
            claude_model: "x".into(),
            claude_fast_model: "x".into(),
            posthog_enabled: false,
            posthog_api_key: None,
            posthog_host: None,
            drive_api_base_url: "http://x".into(),
            llm_api_base_url: "http://x".into(),
            llm_api_key: "x".into(),
            embedder_api_base_url: "http://x".into(),
            embedder_api_key: "x".into(),
            reranker_api_base_url: "http://x".into(),
            reranker_api_key: "x".into(),
            ocr_api_base_url: "http://x".into(),
            ocr_api_key: "x".into(),
            http_timeout_standard: std::time::Duration::from_secs(30),
            http_timeout_ocr: std::time::Duration::from_secs(60),
        }
    }

    fn test_folder(last_synced_at: Option<chrono::DateTime<Utc>>) -> Folder {
        Folder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            remote_folder_id: "remote-folder".into(),
            name: "Docs".into(),
            index_status: IndexStatus::Pending,
            files_total: 0,
            files_indexed: 0,
            last_synced_at,
        }
    }

    #[derive(Default)]
    struct StubFolders {
        error_reason: Mutex<Option<String>>,
        synced: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl FolderStore for StubFolders {
        async fn create_folder(&self, _user_id: Uuid, _remote_folder_id: &str, _name: &str) -> Result<Folder, Error> {
            unimplemented!()
        }
        async fn get_folder(&self, _id: Uuid) -> Result<Folder, Error> {
            unimplemented!()
        }
        async fn list_folders(&self, _user_id: Uuid) -> Result<Vec<Folder>, Error> {
            unimplemented!()
        }
        async fn delete_folder(&self, _id: Uuid) -> Result<(), Error> {
            unimplemented!()
        }
        async fn set_folder_error(&self, _id: Uuid, reason: &str) -> Result<(), Error> {
            *self.error_reason.lock().unwrap() = Some(reason.to_string());
            Ok(())
        }
        async fn set_folder_synced(&self, _id: Uuid, _files_total: i64, _synced_at: chrono::DateTime<Utc>) -> Result<(), Error> {
            *self.synced.lock().unwrap() = true;
            Ok(())
        }
        async fn recompute_folder_progress(&self, id: Uuid) -> Result<Folder, Error> {
            Ok(test_folder_with_id(id))
        }
    }

    fn test_folder_with_id(id: Uuid) -> Folder {
        let mut f = test_folder(None);
        f.id = id;
        f
    }

    #[derive(Default)]
    struct StubFiles {
        stored: Mutex<Vec<drivescout_core::model::File>>,
        reset_ids: Mutex<Vec<Uuid>>,
        deleted_ids: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl FileStore for StubFiles {
        async fn create_file(
            &self,
            folder_id: Uuid,
            remote_file_id: &str,
            name: &str,
            mime_type: &str,
            modified_time: Option<chrono::DateTime<Utc>>,
        ) -> Result<drivescout_core::model::File, Error> {
            let file = drivescout_core::model::File {
                id: Uuid::new_v4(),
                folder_id,
                remote_file_id: remote_file_id.to_string(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                modified_time,
                preview: None,
                embedding: None,
                index_status: FileIndexStatus::Pending,
            };
            self.stored.lock().unwrap().push(file.clone());
            Ok(file)
        }
        async fn get_file(&self, _id: Uuid) -> Result<drivescout_core::model::File, Error> {
            unimplemented!()
        }
        async fn get_file_in_folder(&self, _folder_id: Uuid, _file_id: Uuid) -> Result<drivescout_core::model::File, Error> {
            unimplemented!()
        }
        async fn list_files(&self, _folder_id: Uuid) -> Result<Vec<drivescout_core::model::File>, Error> {
            Ok(self.stored.lock().unwrap().clone())
        }
        async fn get_file_by_remote_id(
            &self,
            _folder_id: Uuid,
            _remote_file_id: &str,
        ) -> Result<Option<drivescout_core::model::File>, Error> {
            unimplemented!()
        }
        async fn set_file_status(&self, _id: Uuid, _status: FileIndexStatus) -> Result<(), Error> {
            unimplemented!()
        }
        async fn reset_file_for_reindex(&self, id: Uuid, _modified_time: Option<chrono::DateTime<Utc>>) -> Result<(), Error> {
            self.reset_ids.lock().unwrap().push(id);
            Ok(())
        }
        async fn set_file_preview_and_embedding(&self, _id: Uuid, _preview: String, _embedding: Vec<f32>) -> Result<(), Error> {
            unimplemented!()
        }
        async fn delete_file(&self, id: Uuid) -> Result<(), Error> {
            self.deleted_ids.lock().unwrap().push(id);
            self.stored.lock().unwrap().retain(|f| f.id != id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubJobs {
        ensured: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl JobStore for StubJobs {
        async fn create_job(&self, _folder_id: Uuid, _file_id: Uuid, _priority: i32) -> Result<IndexingJob, Error> {
            unimplemented!()
        }
        async fn ensure_job(&self, _folder_id: Uuid, file_id: Uuid, _priority: i32) -> Result<(), Error> {
            self.ensured.lock().unwrap().push(file_id);
            Ok(())
        }
        async fn claim_next_job(&self) -> Result<Option<drivescout_storage::ClaimedJob>, Error> {
            unimplemented!()
        }
        async fn complete_job(&self, _job_id: Uuid) -> Result<(), Error> {
            unimplemented!()
        }
        async fn requeue_job(&self, _job_id: Uuid, _retry_after: chrono::DateTime<Utc>, _error: &str) -> Result<(), Error> {
            unimplemented!()
        }
        async fn fail_job(&self, _job_id: Uuid, _error: &str) -> Result<(), Error> {
            unimplemented!()
        }
        async fn get_job(&self, _id: Uuid) -> Result<IndexingJob, Error> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn skips_when_within_sync_interval() {
        let config = test_config();
        let drive = StubDriveClient::default();
        let folders = StubFolders::default();
        let files = StubFiles::default();
        let jobs = StubJobs::default();
        let folder = test_folder(Some(Utc::now()));

        let outcome = sync_folder(&config, &drive, &folders, &files, &jobs, &folder, "token").await.unwrap();
        assert_eq!(outcome, SyncOutcome::SkippedRecentSync);
    }

    #[tokio::test]
    async fn added_files_create_rows_and_enqueue_jobs() {
        let config = test_config();
        let drive = StubDriveClient::default();
        *drive.files.lock().unwrap() = vec![RemoteFile {
            id: "r1".into(),
            name: "New Doc".into(),
            mime_type: "application/pdf".into(),
            modified_time: Some(Utc::now()),
            size: Some(10),
        }];
        let folders = StubFolders::default();
        let files = StubFiles::default();
        let jobs = StubJobs::default();
        let folder = test_folder(None);

        let outcome = sync_folder(&config, &drive, &folders, &files, &jobs, &folder, "token").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { added: 1, modified: 0, deleted: 0 });
        assert_eq!(jobs.ensured.lock().unwrap().len(), 1);
        assert!(*folders.synced.lock().unwrap());
    }

    #[tokio::test]
    async fn modified_files_reset_for_reindex() {
        let config = test_config();
        let folder = test_folder(None);
        let file_id = Uuid::new_v4();
        let old_time = Utc::now() - chrono::Duration::days(2);
        let new_time = Utc::now();

        let drive = StubDriveClient::default();
        *drive.files.lock().unwrap() = vec![RemoteFile {
            id: "r1".into(),
            name: "Doc".into(),
            mime_type: "application/pdf".into(),
            modified_time: Some(new_time),
            size: Some(10),
        }];

        let folders = StubFolders::default();
        let files = StubFiles::default();
        files.stored.lock().unwrap().push(drivescout_core::model::File {
            id: file_id,
            folder_id: folder.id,
            remote_file_id: "r1".into(),
            name: "Doc".into(),
            mime_type: "application/pdf".into(),
            modified_time: Some(old_time),
            preview: Some("preview".into()),
            embedding: None,
            index_status: FileIndexStatus::Indexed,
        });
        let jobs = StubJobs::default();

        let outcome = sync_folder(&config, &drive, &folders, &files, &jobs, &folder, "token").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { added: 0, modified: 1, deleted: 0 });
        assert_eq!(*files.reset_ids.lock().unwrap(), vec![file_id]);
    }

    #[tokio::test]
    async fn removed_remote_files_are_deleted() {
        let config = test_config();
        let folder = test_folder(None);
        let file_id = Uuid::new_v4();

        let drive = StubDriveClient::default();
        let folders = StubFolders::default();
        let files = StubFiles::default();
        files.stored.lock().unwrap().push(drivescout_core::model::File {
            id: file_id,
            folder_id: folder.id,
            remote_file_id: "gone".into(),
            name: "Doc".into(),
            mime_type: "application/pdf".into(),
            modified_time: None,
            preview: None,
            embedding: None,
            index_status: FileIndexStatus::Indexed,
        });
        let jobs = StubJobs::default();

        let outcome = sync_folder(&config, &drive, &folders, &files, &jobs, &folder, "token").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { added: 0, modified: 0, deleted: 1 });
        assert_eq!(*files.deleted_ids.lock().unwrap(), vec![file_id]);
    }

    #[tokio::test]
    async fn upstream_404_maps_to_folder_not_found() {
        assert_eq!(classify_sync_error(&Error::Permanent("upstream 404 Not Found: x".into())), "folder_not_found");
        assert_eq!(classify_sync_error(&Error::Permanent("upstream 403 Forbidden: x".into())), "permission_denied");
        assert_eq!(classify_sync_error(&Error::Transient("upstream 429 Too Many Requests: x".into())), "rate_limited");
        assert_eq!(classify_sync_error(&Error::Internal(anyhow::anyhow!("boom"))), "api_error");
    }
}
