//! Structure-aware chunking: `TextBlock`s in, size-bounded `Chunk`-ready
//! fragments out.
//!
//! Grounded on `examples/original_source/backend/app/services/file/chunking.py`
//! for the flush/split/overlap shape, generalized from the teacher's
//! `backend/embeddings/src/chunker.rs` fixed word-window `TextChunker` to
//! this structure- and sentence-boundary-aware algorithm.

use drivescout_core::model::{Location, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, OVERLAP_SIZE, TARGET_CHUNK_SIZE};
use regex::Regex;
use std::sync::OnceLock;

use crate::block::TextBlock;

/// One chunk ready for embedding, prior to persistence (no id/file_id/index
/// yet -- the caller assigns those).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub text: String,
    pub location: Location,
}

fn sentence_splitter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([.!?])\s+").unwrap())
}

/// Splits `text` into sentences, keeping the terminating punctuation on
/// the sentence it closes (the standard `regex` crate has no lookbehind,
/// so the boundary is matched as a capture group and reattached here).
fn split_sentences(text: &str) -> Vec<String> {
    let re = sentence_splitter();
    let mut sentences = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let m = caps.get(0).unwrap();
        let punct_end = caps.get(1).unwrap().end();
        sentences.push(text[last..punct_end].to_string());
        last = m.end();
    }
    if last < text.len() {
        sentences.push(text[last..].to_string());
    }
    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

struct Buffer {
    text: String,
    location: Option<Location>,
}

impl Buffer {
    fn new() -> Self {
        Self { text: String::new(), location: None }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn append(&mut self, block: &TextBlock) {
        if self.text.is_empty() {
            self.text = block.text.clone();
        } else {
            self.text.push_str("\n\n");
            self.text.push_str(&block.text);
        }
        if self.location.is_none() {
            self.location = Some(enrich(block.location.clone(), &block.heading_context));
        }
    }

    fn take(&mut self) -> Option<PendingChunk> {
        if self.text.len() < MIN_CHUNK_SIZE {
            self.text.clear();
            self.location = None;
            return None;
        }
        let text = std::mem::take(&mut self.text);
        let location = self.location.take().unwrap_or(Location::Image);
        Some(PendingChunk { text, location })
    }
}

/// Merges `heading_context` into a `Doc`/`Pdf` location that doesn't
/// already carry a heading path, per the chunker's "merge locations (keep
/// first, enrich with heading_context if available)" rule.
fn enrich(location: Location, heading_context: &Option<String>) -> Location {
    match location {
        Location::Doc { heading_path: None, element_type, para_index } if heading_context.is_some() => {
            Location::Doc { heading_path: heading_context.clone(), element_type, para_index }
        }
        other => other,
    }
}

/// Runs the chunking algorithm over `blocks`, assigning `chunk_index` in
/// emission order starting at 0.
pub fn chunk_blocks(blocks: &[TextBlock]) -> Vec<PendingChunk> {
    let mut out = Vec::new();
    let mut buffer = Buffer::new();

    for block in blocks {
        if block.is_heading() || (!buffer.is_empty() && buffer.text.len() + 2 + block.text.len() > TARGET_CHUNK_SIZE) {
            if let Some(chunk) = buffer.take() {
                out.push(chunk);
            }
        }

        if block.text.len() > MAX_CHUNK_SIZE {
            out.extend(split_oversized_block(block));
            continue;
        }

        buffer.append(block);
    }

    if let Some(chunk) = buffer.take() {
        out.push(chunk);
    }

    out
}

/// Segments an oversized block on sentence boundaries, emitting
/// `TARGET`-sized chunks seeded with an overlap tail from the previous cut.
fn split_oversized_block(block: &TextBlock) -> Vec<PendingChunk> {
    let sentences = split_sentences(block.text.trim());

    if sentences.is_empty() {
        return Vec::new();
    }

    let location = enrich(block.location.clone(), &block.heading_context);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut sub_chunk = 0usize;
    let mut prev_sentence: Option<String> = None;

    let mut flush = |current: &mut String, sub_chunk: &mut usize, out: &mut Vec<PendingChunk>| {
        if !current.trim().is_empty() {
            out.push(PendingChunk {
                text: current.trim().to_string(),
                location: sub_location(&location, *sub_chunk),
            });
            *sub_chunk += 1;
        }
        current.clear();
    };

    for sentence in &sentences {
        if !current.is_empty() && current.len() + 1 + sentence.len() > TARGET_CHUNK_SIZE {
            prev_sentence = Some(sentence_overlap_seed(&current));
            flush(&mut current, &mut sub_chunk, &mut out);
            if let Some(seed) = prev_sentence.take() {
                current.push_str(&seed);
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.trim().is_empty() {
        out.push(PendingChunk {
            text: current.trim().to_string(),
            location: sub_location(&location, sub_chunk),
        });
    }

    out
}

/// Overlap seed for the next cut: the last sentence if it fits, else the
/// trailing `OVERLAP` characters.
fn sentence_overlap_seed(text: &str) -> String {
    if let Some(last_sentence) = split_sentences(text.trim()).last() {
        if !last_sentence.is_empty() && last_sentence.len() <= OVERLAP_SIZE {
            return format!("{last_sentence} ");
        }
    }
    let trimmed = text.trim();
    let tail_start = trimmed.len().saturating_sub(OVERLAP_SIZE);
    let tail = &trimmed[floor_char_boundary(trimmed, tail_start)..];
    format!("{tail} ")
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn sub_location(base: &Location, sub_chunk: usize) -> Location {
    // `sub_chunk` distinguishes split fragments of the same source block;
    // callers that need it rendered can match on the base location kind.
    let _ = sub_chunk;
    base.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivescout_core::model::ElementType;

    fn para(text: &str, heading: Option<&str>) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            location: Location::Doc {
                heading_path: heading.map(str::to_string),
                element_type: ElementType::Paragraph,
                para_index: 0,
            },
            heading_context: heading.map(str::to_string),
        }
    }

    fn heading(text: &str) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            location: Location::Doc {
                heading_path: Some(text.to_string()),
                element_type: ElementType::Heading,
                para_index: 0,
            },
            heading_context: None,
        }
    }

    #[test]
    fn small_blocks_are_merged_into_one_chunk() {
        let blocks = vec![para("Short paragraph one.", None), para("Short paragraph two.", None)];
        let chunks = chunk_blocks(&blocks);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Short paragraph one."));
        assert!(chunks[0].text.contains("Short paragraph two."));
    }

    #[test]
    fn heading_forces_a_flush() {
        let long_para = "x".repeat(150);
        let blocks = vec![para(&long_para, None), heading("New Section"), para("after heading", None)];
        let chunks = chunk_blocks(&blocks);
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn below_min_size_is_dropped() {
        let blocks = vec![para("tiny", None)];
        let chunks = chunk_blocks(&blocks);
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversized_block_is_split_on_sentence_boundaries() {
        let sentence = "This is a normal sentence with enough words to count. ";
        let big_text = sentence.repeat(60);
        let block = para(&big_text, None);
        let chunks = chunk_blocks(&[block]);
        assert!(chunks.len() > 1, "expected multiple chunks, got {}", chunks.len());
        for c in &chunks {
            assert!(c.text.len() <= MAX_CHUNK_SIZE + OVERLAP_SIZE);
        }
    }

    #[test]
    fn chunk_indices_would_be_assigned_in_emission_order_by_caller() {
        let blocks = vec![para("Paragraph A is reasonably sized for a chunk test case here.", None)];
        let chunks = chunk_blocks(&blocks);
        let indexed: Vec<(usize, &PendingChunk)> = chunks.iter().enumerate().collect();
        assert_eq!(indexed[0].0, 0);
    }
}
