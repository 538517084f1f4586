//! Entities from the data model: `User`, `Session`, `Folder`, `File`,
//! `Chunk`, `Location`, `IndexingJob`, `FailedTask`, `Conversation`,
//! `Message`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum IndexStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum FileIndexStatus {
    Pending,
    Indexed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Encrypted at rest; decrypt lazily via `crypto::decrypt`.
    pub access_token_enc: String,
    pub refresh_token_enc: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub remote_folder_id: String,
    pub name: String,
    pub index_status: IndexStatus,
    pub files_total: i64,
    pub files_indexed: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Folder {
    /// `folder.status == Ready ⇔ every file.status ∈ {Indexed, Skipped} ∧ files_indexed == files_total`
    pub fn rollup_status(files_indexed: i64, files_total: i64) -> IndexStatus {
        if files_indexed == files_total {
            IndexStatus::Ready
        } else {
            IndexStatus::Indexing
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MimeClass {
    GoogleDoc,
    Pdf,
    Image,
    Spreadsheet,
    Unsupported,
}

impl MimeClass {
    pub fn classify(mime_type: &str) -> Self {
        match mime_type {
            "application/vnd.google-apps.document" => MimeClass::GoogleDoc,
            "application/pdf" => MimeClass::Pdf,
            "image/png" | "image/jpeg" | "image/webp" | "image/gif" => MimeClass::Image,
            "application/vnd.google-apps.spreadsheet"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                MimeClass::Spreadsheet
            }
            _ => MimeClass::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub remote_file_id: String,
    pub name: String,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub preview: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub index_status: FileIndexStatus,
}

/// A structured descriptor of where a chunk sits inside its file. Used for
/// citation rendering, not for retrieval filtering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Doc {
        heading_path: Option<String>,
        element_type: ElementType,
        para_index: usize,
    },
    Pdf {
        page: usize,
        block_index: usize,
        element_type: Option<ElementType>,
        heading_level: Option<u8>,
    },
    Sheet {
        sheet_name: String,
        sheet_index: usize,
    },
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Heading,
    Paragraph,
    List,
    Table,
}

impl Location {
    /// Human-readable rendering for citation display, e.g. `"A > B, p.3"`.
    pub fn render(&self) -> String {
        match self {
            Location::Doc { heading_path, .. } => {
                heading_path.clone().unwrap_or_else(|| "Document".to_string())
            }
            Location::Pdf { page, .. } => format!("Page {}", page + 1),
            Location::Sheet { sheet_name, .. } => sheet_name.clone(),
            Location::Image => "Image".to_string(),
        }
    }
}

pub const MIN_CHUNK_SIZE: usize = 100;
pub const MAX_CHUNK_SIZE: usize = 2000;
pub const TARGET_CHUNK_SIZE: usize = 1500;
pub const OVERLAP_SIZE: usize = 150;
pub const EMBEDDING_DIM: usize = 768;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub chunk_text: String,
    pub chunk_embedding: Option<Vec<f32>>,
    pub location: Location,
    pub chunk_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub file_id: Uuid,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IndexingJob {
    pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
    pub const DEFAULT_PRIORITY: i32 = 0;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: Uuid,
    pub upstream_task_id: Uuid,
    pub task_name: String,
    pub args: serde_json::Value,
    pub exception_type: String,
    pub message: String,
    pub traceback: String,
    pub retries: i32,
    pub failed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: Uuid,
    pub file_name: String,
    pub location: String,
    pub excerpt: String,
    pub source_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub citations: HashMap<String, Citation>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_ready_iff_fully_indexed() {
        assert_eq!(Folder::rollup_status(3, 3), IndexStatus::Ready);
        assert_eq!(Folder::rollup_status(2, 3), IndexStatus::Indexing);
        assert_eq!(Folder::rollup_status(0, 0), IndexStatus::Ready);
    }

    #[test]
    fn location_render_doc_falls_back_to_document() {
        let loc = Location::Doc {
            heading_path: None,
            element_type: ElementType::Paragraph,
            para_index: 0,
        };
        assert_eq!(loc.render(), "Document");
    }

    #[test]
    fn location_render_pdf_is_one_indexed() {
        let loc = Location::Pdf {
            page: 0,
            block_index: 2,
            element_type: None,
            heading_level: None,
        };
        assert_eq!(loc.render(), "Page 1");
    }
}
