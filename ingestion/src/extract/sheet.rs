//! Spreadsheet extraction: each sheet becomes one Markdown-table block.
//! Bounded at `MAX_ROWS`/`MAX_COLS`; grounded on
//! `original_source/backend/app/services/file/extraction/spreadsheet.py`.

use crate::block::{ExtractedDocument, TextBlock};
use calamine::{Data, Reader, Xlsx};
use drivescout_core::error::Error;
use drivescout_core::model::Location;
use std::io::Cursor;

const MAX_ROWS: usize = 10_000;
const MAX_COLS: usize = 100;

pub struct SpreadsheetExtractor;

impl SpreadsheetExtractor {
    pub fn extract(&self, content: &[u8], file_name: &str) -> Result<ExtractedDocument, Error> {
        let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(content))
            .map_err(|e| Error::Validation(format!("failed to load spreadsheet {file_name}: {e}")))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let mut blocks = Vec::new();

        for (sheet_index, sheet_name) in sheet_names.iter().enumerate() {
            let range = match workbook.worksheet_range(sheet_name) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(sheet = %sheet_name, error = %e, "failed to read sheet, skipping");
                    continue;
                }
            };

            let text = render_sheet_markdown(sheet_name, &range);
            if text.trim().is_empty() {
                continue;
            }
            blocks.push(TextBlock {
                text,
                location: Location::Sheet {
                    sheet_name: sheet_name.clone(),
                    sheet_index,
                },
                heading_context: Some(format!("Sheet: {sheet_name}")),
            });
        }

        Ok(ExtractedDocument {
            title: Some(file_name.to_string()),
            blocks,
        })
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::String(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => d.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

fn format_row(cells: &[String], is_header: bool) -> String {
    let row = format!("| {} |", cells.join(" | "));
    if is_header {
        let separator = format!("| {} |", vec!["---"; cells.len()].join(" | "));
        format!("{row}\n{separator}")
    } else {
        row
    }
}

fn render_sheet_markdown(sheet_name: &str, range: &calamine::Range<Data>) -> String {
    let mut lines = vec![format!("## {sheet_name}\n")];

    let (height, width) = range.get_size();
    let max_row = height.min(MAX_ROWS);
    let max_col = width.min(MAX_COLS);

    if max_row == 0 || max_col == 0 {
        lines.push("*Empty sheet*".to_string());
        return lines.join("\n");
    }

    let mut rows_data: Vec<Vec<String>> = Vec::new();
    for row_idx in 0..max_row {
        let mut row_cells = Vec::with_capacity(max_col);
        for col_idx in 0..max_col {
            let cell = range.get((row_idx, col_idx)).unwrap_or(&Data::Empty);
            row_cells.push(cell_to_string(cell));
        }
        if row_cells.iter().any(|c| !c.trim().is_empty()) {
            rows_data.push(row_cells);
        }
    }

    if rows_data.is_empty() {
        lines.push("*Empty sheet*".to_string());
        return lines.join("\n");
    }

    let max_cols_in_data = rows_data.iter().map(|r| r.len()).max().unwrap_or(0);
    for row in &mut rows_data {
        while row.len() < max_cols_in_data {
            row.push(String::new());
        }
    }

    lines.push(format_row(&rows_data[0], true));
    for row in &rows_data[1..] {
        lines.push(format_row(row, false));
    }

    if height >= MAX_ROWS {
        lines.push(format!("\n*Note: Showing first {MAX_ROWS} rows (truncated)*"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_formatting_strips_trailing_zero() {
        assert_eq!(cell_to_string(&Data::Float(3.0)), "3");
        assert_eq!(cell_to_string(&Data::Float(3.5)), "3.5");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn header_row_gets_separator() {
        let formatted = format_row(&["a".into(), "b".into()], true);
        assert_eq!(formatted, "| a | b |\n| --- | --- |");
    }
}
