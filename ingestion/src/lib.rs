//! Extraction, chunking, and drive-access for the indexing pipeline
//! (spec.md §4.2, §4.3).

pub mod block;
pub mod chunker;
pub mod drive;
pub mod extract;
pub mod ocr;
pub mod preview;

pub use block::{ExtractedDocument, TextBlock};
pub use chunker::{chunk_blocks, PendingChunk};
pub use drive::{DriveClient, GoogleDriveClient, RemoteFile};
pub use extract::{extract, Extractor, MAX_IMAGE_SIZE_BYTES};
pub use ocr::{HttpOcrProvider, OcrPage, OcrProvider};
pub use preview::build_preview;
