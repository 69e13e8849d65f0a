//! Disclosure parsing: one parser per catalog format tag.
//!
//! The dispatch is a closed match over [`SourceFormat`]; adding a format
//! means adding a variant and a parser, nothing is discovered at runtime.
//! Parsers only shape bytes into ordered rows; all interpretation (periods,
//! units, indicator matching) happens in the normalization stage.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use chrono::NaiveTime;

use crate::catalog::{SourceDefinition, SourceFormat};
use crate::domain::{ParseMetadata, ParsedDataset, ParsedRow};
use crate::error::AppError;

/// Parse `path` according to the format declared in `source`.
pub fn parse_file(path: &Path, source: &SourceDefinition) -> Result<ParsedDataset, AppError> {
    match source.format {
        SourceFormat::Csv => parse_csv(path, source.encoding.as_deref()),
        SourceFormat::Xlsx | SourceFormat::Xls => parse_xlsx(path, source.worksheet.as_deref()),
        SourceFormat::Pdf => parse_pdf(path),
    }
}

fn parse_csv(path: &Path, encoding: Option<&str>) -> Result<ParsedDataset, AppError> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::external(format!("Failed to read CSV '{}': {e}", path.display())))?;
    // Regulator portals occasionally serve Latin-1 or mislabeled UTF-8; a
    // lossy decode keeps the numeric columns intact either way.
    let text = String::from_utf8_lossy(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::external(format!("Failed to read CSV headers: {e}")))?
        .iter()
        .enumerate()
        .map(|(idx, name)| normalize_header(name, idx))
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = idx + 2, "Skipping malformed CSV record: {e}");
                continue;
            }
        };
        let width = headers.len().max(record.len());
        let fields = (0..width)
            .map(|i| {
                let name = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("column_{i}"));
                let value = record.get(i).unwrap_or("").to_string();
                (name, value)
            })
            .collect();
        rows.push(ParsedRow::new(fields));
    }

    Ok(ParsedDataset {
        rows,
        metadata: ParseMetadata {
            columns: headers,
            encoding: Some(encoding.unwrap_or("utf-8").to_string()),
            worksheet: None,
            pages: None,
        },
    })
}

fn parse_xlsx(path: &Path, worksheet: Option<&str>) -> Result<ParsedDataset, AppError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        AppError::external(format!("Failed to open workbook '{}': {e}", path.display()))
    })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet = match worksheet {
        Some(name) => {
            if !sheet_names.iter().any(|candidate| candidate == name) {
                return Err(AppError::config(format!(
                    "Worksheet '{name}' not found in '{}'",
                    path.display()
                )));
            }
            name.to_string()
        }
        None => sheet_names.first().cloned().ok_or_else(|| {
            AppError::external(format!("Workbook '{}' has no worksheets", path.display()))
        })?,
    };

    let range = workbook.worksheet_range(&sheet).map_err(|e| {
        AppError::external(format!("Failed to read worksheet '{sheet}': {e}"))
    })?;

    let mut range_rows = range.rows();
    let headers: Vec<String> = match range_rows.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .map(|(idx, cell)| normalize_header(&cell_text(cell), idx))
            .collect(),
        None => {
            return Ok(ParsedDataset {
                rows: Vec::new(),
                metadata: ParseMetadata {
                    columns: Vec::new(),
                    encoding: None,
                    worksheet: Some(sheet),
                    pages: None,
                },
            });
        }
    };

    let mut rows = Vec::new();
    for row in range_rows {
        let width = headers.len().max(row.len());
        let fields = (0..width)
            .map(|i| {
                let name = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("column_{i}"));
                let value = row.get(i).map(cell_text).unwrap_or_default();
                (name, value)
            })
            .collect();
        rows.push(ParsedRow::new(fields));
    }

    Ok(ParsedDataset {
        rows,
        metadata: ParseMetadata {
            columns: headers,
            encoding: None,
            worksheet: Some(sheet),
            pages: None,
        },
    })
}

fn parse_pdf(path: &Path) -> Result<ParsedDataset, AppError> {
    let text = pdf_extract::extract_text(path).map_err(|e| {
        AppError::external(format!("Failed to extract PDF text '{}': {e}", path.display()))
    })?;

    // One row per page, same shape the PDF-backed sources have always had:
    // downstream matching runs against the free text of each page.
    let mut rows = Vec::new();
    for (index, page) in text.split('\u{c}').enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        rows.push(ParsedRow::new(vec![
            ("page".to_string(), (index + 1).to_string()),
            ("text".to_string(), page.to_string()),
        ]));
    }

    let pages = rows.len();
    Ok(ParsedDataset {
        rows,
        metadata: ParseMetadata {
            columns: vec!["page".to_string(), "text".to_string()],
            encoding: None,
            worksheet: None,
            pages: Some(pages),
        },
    })
}

/// Strip a UTF-8 BOM from the first header and fill in blank names.
///
/// Excel and some portal exports emit a BOM prefix on the first header
/// (e.g. "\u{feff}Year"); without stripping it, indicator matching silently
/// misses the column.
fn normalize_header(name: &str, index: usize) -> String {
    let cleaned = name.trim().trim_start_matches('\u{feff}');
    if cleaned.is_empty() {
        format!("column_{index}")
    } else {
        cleaned.to_string()
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.time() == NaiveTime::MIN => value.date().to_string(),
            Some(value) => value.to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceFormat;
    use std::io::Write;

    fn csv_source() -> SourceDefinition {
        SourceDefinition {
            id: "demo".to_string(),
            name: "Demo".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
            bank: "Banco Demo".to_string(),
            url: "file:///tmp/demo.csv".to_string(),
            format: SourceFormat::Csv,
            frequency: "quarterly".to_string(),
            indicators: vec!["CET1/RWA".to_string()],
            description: None,
            encoding: None,
            worksheet: None,
        }
    }

    #[test]
    fn csv_rows_preserve_column_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "\u{feff}Year,Quarter,CET1/RWA").unwrap();
        writeln!(file, "2024,Q1,12%").unwrap();
        writeln!(file, "2024,Q2,").unwrap();

        let dataset = parse_file(file.path(), &csv_source()).unwrap();
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(
            dataset.metadata.columns,
            vec!["Year", "Quarter", "CET1/RWA"]
        );

        let keys: Vec<&str> = dataset.rows[0].iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["Year", "Quarter", "CET1/RWA"]);
        assert_eq!(dataset.rows[0].get("CET1/RWA"), Some("12%"));
        assert_eq!(dataset.rows[1].get("CET1/RWA"), Some(""));
    }

    #[test]
    fn blank_headers_get_positional_names() {
        assert_eq!(normalize_header("", 3), "column_3");
        assert_eq!(normalize_header("\u{feff}Year", 0), "Year");
    }
}
