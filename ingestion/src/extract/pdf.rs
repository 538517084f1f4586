//! PDF extraction: delegate to an OCR provider for per-page Markdown, then
//! tokenize each page into blocks on heading lines and blank-line
//! boundaries.
//!
//! Grounded on `original_source/backend/app/services/file/extraction/pdf.py`'s
//! `_parse_markdown_blocks` line scanner.

use crate::block::{ExtractedDocument, TextBlock};
use crate::ocr::OcrProvider;
use drivescout_core::error::Error;
use drivescout_core::model::{ElementType, Location};
use std::sync::Arc;

pub struct PdfExtractor {
    ocr: Arc<dyn OcrProvider>,
}

impl PdfExtractor {
    pub fn new(ocr: Arc<dyn OcrProvider>) -> Self {
        Self { ocr }
    }

    pub async fn extract(&self, pdf_bytes: &[u8]) -> Result<ExtractedDocument, Error> {
        let pages = self.ocr.ocr(pdf_bytes).await?;

        let mut blocks = Vec::new();
        let mut title = None;

        for (page_idx, page) in pages.iter().enumerate() {
            if page.markdown.is_empty() {
                continue;
            }
            let page_num = page_idx + 1;
            let page_blocks = parse_markdown_blocks(&page.markdown, page_num);

            if title.is_none() {
                if let Some(first) = page_blocks.first() {
                    if first.text.len() < 200 {
                        title = Some(first.text.clone());
                    }
                }
            }
            blocks.extend(page_blocks);
        }

        Ok(ExtractedDocument { title, blocks })
    }
}

fn parse_markdown_blocks(markdown: &str, page_num: usize) -> Vec<TextBlock> {
    let mut blocks = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut block_index = 0usize;

    let flush = |lines: &mut Vec<&str>,
                 blocks: &mut Vec<TextBlock>,
                 block_index: &mut usize,
                 heading: &Option<String>| {
        if lines.is_empty() {
            return;
        }
        let text = lines.join("\n").trim().to_string();
        lines.clear();
        if text.is_empty() {
            return;
        }
        blocks.push(TextBlock {
            text,
            location: Location::Pdf {
                page: page_num,
                block_index: *block_index,
                element_type: None,
                heading_level: None,
            },
            heading_context: heading.clone(),
        });
        *block_index += 1;
    };

    for line in markdown.split('\n') {
        let stripped = line.trim();

        if let Some(rest) = stripped.strip_prefix('#') {
            flush(&mut current_lines, &mut blocks, &mut block_index, &current_heading);

            let hashes = stripped.len() - stripped.trim_start_matches('#').len();
            let heading_text = rest.trim_start_matches('#').trim().to_string();
            current_heading = Some(heading_text.clone());

            blocks.push(TextBlock {
                text: heading_text.clone(),
                location: Location::Pdf {
                    page: page_num,
                    block_index,
                    element_type: Some(ElementType::Heading),
                    heading_level: Some(hashes as u8),
                },
                heading_context: Some(heading_text),
            });
            block_index += 1;
        } else if stripped.is_empty() {
            flush(&mut current_lines, &mut blocks, &mut block_index, &current_heading);
        } else {
            current_lines.push(stripped);
        }
    }

    flush(&mut current_lines, &mut blocks, &mut block_index, &current_heading);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrPage;
    use async_trait::async_trait;

    struct StubOcr(Vec<OcrPage>);

    #[async_trait]
    impl OcrProvider for StubOcr {
        async fn ocr(&self, _pdf_bytes: &[u8]) -> Result<Vec<OcrPage>, Error> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn splits_on_headings_and_blank_lines() {
        let markdown = "# Title\n\nFirst paragraph.\n\n## Section\n\nSecond paragraph.\n";
        let extractor = PdfExtractor::new(Arc::new(StubOcr(vec![OcrPage { markdown: markdown.into() }])));
        let doc = extractor.extract(b"fake pdf bytes").await.unwrap();

        assert_eq!(doc.title.as_deref(), Some("Title"));
        let headings: Vec<_> = doc
            .blocks
            .iter()
            .filter(|b| matches!(&b.location, Location::Pdf { element_type: Some(ElementType::Heading), .. }))
            .collect();
        assert_eq!(headings.len(), 2);

        let second = doc.blocks.iter().find(|b| b.text == "Second paragraph.").unwrap();
        assert_eq!(second.heading_context.as_deref(), Some("Section"));
    }
}
