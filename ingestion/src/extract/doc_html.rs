//! Google Docs HTML export extraction.
//!
//! Grounded on `original_source/backend/app/services/file/extraction/google_docs.py`:
//! walk the body in document order, track a heading stack popped on
//! equal-or-shallower level, and emit one block per heading / paragraph /
//! top-level list / table.

use crate::block::{ExtractedDocument, TextBlock};
use drivescout_core::model::{ElementType, Location};
use scraper::{ElementRef, Html, Selector};

pub struct DocHtmlExtractor;

impl DocHtmlExtractor {
    pub fn extract(&self, html_content: &str) -> ExtractedDocument {
        let document = Html::parse_document(html_content);
        let title = extract_title(&document);
        let blocks = extract_blocks(&document);
        ExtractedDocument { title, blocks }
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_sel = Selector::parse("title").unwrap();
    if let Some(el) = document.select(&title_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    let h1_sel = Selector::parse("h1").unwrap();
    document
        .select(&h1_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn build_heading_path(stack: &[(u8, String)]) -> Option<String> {
    if stack.is_empty() {
        None
    } else {
        Some(stack.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>().join(" > "))
    }
}

fn is_descendant_of(el: &ElementRef, tag_names: &[&str]) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| tag_names.contains(&a.value().name()))
}

fn list_text(el: &ElementRef) -> String {
    let li_sel = Selector::parse(":scope > li").unwrap();
    el.select(&li_sel)
        .filter_map(|li| {
            let text = li.text().collect::<String>().trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(format!("- {text}"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn table_text(el: &ElementRef) -> String {
    let tr_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("td, th").unwrap();
    el.select(&tr_sel)
        .filter_map(|tr| {
            let cells: Vec<String> = tr
                .select(&cell_sel)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if cells.is_empty() {
                None
            } else {
                Some(cells.join(" | "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_blocks(document: &Html) -> Vec<TextBlock> {
    let body_sel = Selector::parse("body").unwrap();
    let Some(body) = document.select(&body_sel).next() else {
        return Vec::new();
    };

    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, ul, ol, table").unwrap();
    let mut blocks = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();
    let mut para_index = 0usize;

    for el in body.select(&selector) {
        let tag = el.value().name();

        if let Some(level_ch) = tag.strip_prefix('h') {
            let Ok(level) = level_ch.parse::<u8>() else { continue };
            let text = el.text().collect::<String>().trim().to_string();
            if text.is_empty() {
                continue;
            }
            heading_stack.retain(|(lvl, _)| *lvl < level);
            heading_stack.push((level, text.clone()));
            let heading_path = build_heading_path(&heading_stack);
            blocks.push(TextBlock {
                text,
                location: Location::Doc {
                    heading_path: heading_path.clone(),
                    element_type: ElementType::Heading,
                    para_index,
                },
                heading_context: heading_path,
            });
            continue;
        }

        match tag {
            "p" => {
                if is_descendant_of(&el, &["h1", "h2", "h3", "h4", "h5", "h6"]) {
                    continue;
                }
                let text = el.text().collect::<String>().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let heading_path = build_heading_path(&heading_stack);
                blocks.push(TextBlock {
                    text,
                    location: Location::Doc {
                        heading_path: heading_path.clone(),
                        element_type: ElementType::Paragraph,
                        para_index,
                    },
                    heading_context: heading_path,
                });
                para_index += 1;
            }
            "ul" | "ol" => {
                if is_descendant_of(&el, &["ul", "ol"]) {
                    continue;
                }
                let text = list_text(&el);
                if text.is_empty() {
                    continue;
                }
                let heading_path = build_heading_path(&heading_stack);
                blocks.push(TextBlock {
                    text,
                    location: Location::Doc {
                        heading_path: heading_path.clone(),
                        element_type: ElementType::List,
                        para_index,
                    },
                    heading_context: heading_path,
                });
                para_index += 1;
            }
            "table" => {
                let text = table_text(&el);
                if text.is_empty() {
                    continue;
                }
                let heading_path = build_heading_path(&heading_stack);
                blocks.push(TextBlock {
                    text,
                    location: Location::Doc {
                        heading_path: heading_path.clone(),
                        element_type: ElementType::Table,
                        para_index,
                    },
                    heading_context: heading_path,
                });
                para_index += 1;
            }
            _ => {}
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_heading_path_and_skips_nested_paragraphs() {
        let html = r#"
            <html><head><title>Doc Title</title></head>
            <body>
                <h1>Intro</h1>
                <p>First paragraph.</p>
                <h2>Details</h2>
                <p>Second paragraph.</p>
                <ul><li>one</li><li>two</li></ul>
                <table><tr><td>a</td><td>b</td></tr></table>
            </body>
            </html>
        "#;
        let doc = DocHtmlExtractor.extract(html);
        assert_eq!(doc.title.as_deref(), Some("Doc Title"));

        let headings: Vec<_> = doc.blocks.iter().filter(|b| b.is_heading()).collect();
        assert_eq!(headings.len(), 2);

        let second_para = doc
            .blocks
            .iter()
            .find(|b| b.text == "Second paragraph.")
            .unwrap();
        match &second_para.location {
            Location::Doc { heading_path, .. } => {
                assert_eq!(heading_path.as_deref(), Some("Intro > Details"));
            }
            _ => panic!("expected doc location"),
        }
    }

    #[test]
    fn empty_body_yields_no_blocks() {
        let doc = DocHtmlExtractor.extract("<html><body></body></html>");
        assert!(doc.blocks.is_empty());
    }
}
