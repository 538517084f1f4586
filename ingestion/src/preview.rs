//! File preview generation: headings first, then content blocks, truncated
//! to ~500 characters. Used only for the file-level embedding and UI
//! display (spec.md §4.3 "File preview").

use crate::block::TextBlock;

pub const PREVIEW_MAX_CHARS: usize = 500;

pub fn build_preview(blocks: &[TextBlock]) -> String {
    let (headings, content): (Vec<&TextBlock>, Vec<&TextBlock>) =
        blocks.iter().partition(|b| b.is_heading());

    let mut out = String::new();
    for block in headings.iter().chain(content.iter()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&block.text);
        if out.len() >= PREVIEW_MAX_CHARS {
            break;
        }
    }

    truncate_chars(&out, PREVIEW_MAX_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
