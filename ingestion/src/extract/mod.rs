//! Dispatches a file to one of four extractors based on its mime class.
//!
//! Generalizes the teacher's `extract::extract_text` extension-dispatch
//! shape (`backend/ingestion/src/extract.rs`) from "pick a parser by file
//! extension" to "pick an extractor by mime class", and fans out to
//! per-format modules grounded on `original_source`'s
//! `app/services/file/extraction/*.py`.

mod doc_html;
mod image;
mod pdf;
mod sheet;

pub use doc_html::DocHtmlExtractor;
pub use image::{ChatVisionProvider, ImageExtractor, VisionProvider};
pub use pdf::PdfExtractor;
pub use sheet::SpreadsheetExtractor;

use crate::block::ExtractedDocument;
use crate::ocr::OcrProvider;
use async_trait::async_trait;
use drivescout_core::error::Error;
use drivescout_core::model::MimeClass;
use std::sync::Arc;

pub const MAX_IMAGE_SIZE_BYTES: usize = 10 * 1024 * 1024;

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, content: &[u8], file_name: &str, mime_type: &str) -> Result<ExtractedDocument, Error>;
}

/// Picks and runs the extractor for `mime_type`. Returns `Ok(None)` for
/// mime classes the spec marks Unsupported, per the worker's "Unsupported
/// -> File=Skipped" step.
pub async fn extract(
    ocr: &Arc<dyn OcrProvider>,
    vision: &Arc<dyn VisionProvider>,
    content: &[u8],
    file_name: &str,
    mime_type: &str,
) -> Result<Option<ExtractedDocument>, Error> {
    match MimeClass::classify(mime_type) {
        MimeClass::GoogleDoc => {
            let html = String::from_utf8_lossy(content).into_owned();
            Ok(Some(DocHtmlExtractor.extract(&html)))
        }
        MimeClass::Pdf => {
            let extractor = PdfExtractor::new(ocr.clone());
            Ok(Some(extractor.extract(content).await?))
        }
        MimeClass::Image => {
            if content.len() > MAX_IMAGE_SIZE_BYTES {
                return Err(Error::Validation(format!(
                    "image {file_name} exceeds size limit: {:.1}MB > 10MB",
                    content.len() as f64 / 1024.0 / 1024.0
                )));
            }
            let extractor = ImageExtractor::new(vision.clone());
            Ok(Some(extractor.extract(content, mime_type, file_name).await?))
        }
        MimeClass::Spreadsheet => Ok(Some(SpreadsheetExtractor.extract(content, file_name)?)),
        MimeClass::Unsupported => Ok(None),
    }
}
