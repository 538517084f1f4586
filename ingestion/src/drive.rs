//! Source drive capability (spec.md §6, consumed): `list_files`,
//! `get_file_metadata`, `export_as`, `download`. One HTTP implementation
//! against a Google-Drive-shaped API, grounded on the `reqwest`-based
//! pattern in the teacher's `backend/ingestion/src/web.rs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drivescout_core::config::AppConfig;
use drivescout_core::error::Error;
use drivescout_core::retry::{retry_with_backoff, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

#[async_trait]
pub trait DriveClient: Send + Sync {
    async fn list_files(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        access_token: &str,
    ) -> Result<(Vec<RemoteFile>, Option<String>), Error>;

    async fn get_file_metadata(&self, file_id: &str, access_token: &str) -> Result<RemoteFile, Error>;

    async fn export_as(&self, file_id: &str, mime_type: &str, access_token: &str) -> Result<String, Error>;

    async fn download(&self, file_id: &str, access_token: &str) -> Result<Vec<u8>, Error>;
}

/// Lists every remote file in `folder_id`, paginating until `next_token`
/// is exhausted, per spec.md §4.2's diff step.
pub async fn list_all_files(
    client: &dyn DriveClient,
    folder_id: &str,
    access_token: &str,
) -> Result<Vec<RemoteFile>, Error> {
    let mut files = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let (page, next) = client.list_files(folder_id, page_token.as_deref(), access_token).await?;
        files.extend(page);
        match next {
            Some(t) => page_token = Some(t),
            None => break,
        }
    }
    Ok(files)
}

pub struct GoogleDriveClient {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleDriveClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout_standard)
            .build()
            .expect("failed to build drive http client");
        Self { client, base_url: config.drive_api_base_url.clone() }
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(20))
    }
}

#[derive(Deserialize)]
struct ListFilesResponse {
    files: Vec<DriveFileDto>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct DriveFileDto {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
    #[serde(rename = "modifiedTime")]
    modified_time: Option<DateTime<Utc>>,
    #[serde(rename = "size")]
    size: Option<String>,
}

impl From<DriveFileDto> for RemoteFile {
    fn from(dto: DriveFileDto) -> Self {
        RemoteFile {
            id: dto.id,
            name: dto.name,
            mime_type: dto.mime_type,
            modified_time: dto.modified_time,
            size: dto.size.and_then(|s| s.parse().ok()),
        }
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_files(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        access_token: &str,
    ) -> Result<(Vec<RemoteFile>, Option<String>), Error> {
        let client = &self.client;
        let base_url = &self.base_url;
        retry_with_backoff(Self::retry_policy(), || async {
            let mut req = client
                .get(format!("{base_url}/files"))
                .bearer_auth(access_token)
                .query(&[
                    ("q", format!("'{folder_id}' in parents and trashed = false")),
                    ("fields", "nextPageToken, files(id, name, mimeType, modifiedTime, size)".to_string()),
                    ("pageSize", "100".to_string()),
                ]);
            if let Some(token) = page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let resp = req.send().await?.error_for_status()?;
            let parsed: ListFilesResponse = resp.json().await?;
            Ok((
                parsed.files.into_iter().map(RemoteFile::from).collect(),
                parsed.next_page_token,
            ))
        })
        .await
    }

    async fn get_file_metadata(&self, file_id: &str, access_token: &str) -> Result<RemoteFile, Error> {
        let client = &self.client;
        let base_url = &self.base_url;
        retry_with_backoff(Self::retry_policy(), || async {
            let resp = client
                .get(format!("{base_url}/files/{file_id}"))
                .bearer_auth(access_token)
                .query(&[("fields", "id, name, mimeType, modifiedTime, size")])
                .send()
                .await?
                .error_for_status()?;
            let dto: DriveFileDto = resp.json().await?;
            Ok(RemoteFile::from(dto))
        })
        .await
    }

    async fn export_as(&self, file_id: &str, mime_type: &str, access_token: &str) -> Result<String, Error> {
        let client = &self.client;
        let base_url = &self.base_url;
        retry_with_backoff(Self::retry_policy(), || async {
            let resp = client
                .get(format!("{base_url}/files/{file_id}/export"))
                .bearer_auth(access_token)
                .query(&[("mimeType", mime_type)])
                .send()
                .await?
                .error_for_status()?;
            Ok(resp.text().await?)
        })
        .await
    }

    async fn download(&self, file_id: &str, access_token: &str) -> Result<Vec<u8>, Error> {
        let client = &self.client;
        let base_url = &self.base_url;
        retry_with_backoff(Self::retry_policy(), || async {
            let resp = client
                .get(format!("{base_url}/files/{file_id}"))
                .bearer_auth(access_token)
                .query(&[("alt", "media")])
                .send()
                .await?
                .error_for_status()?;
            Ok(resp.bytes().await?.to_vec())
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockDriveClient;
    use super::*;

    #[tokio::test]
    async fn list_all_files_paginates_through_mock() {
        let mock = MockDriveClient::default();
        *mock.files.lock().unwrap() = vec![RemoteFile {
            id: "f1".into(),
            name: "Doc A".into(),
            mime_type: "application/pdf".into(),
            modified_time: None,
            size: Some(10),
        }];
        let files = list_all_files(&mock, "folder1", "token").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "Doc A");
    }
}
