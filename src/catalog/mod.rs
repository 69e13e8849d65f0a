//! Source catalog loading.
//!
//! The catalog is a YAML file listing every regulator disclosure the pipeline
//! tracks: where to fetch it, which bank it belongs to, what format it ships
//! in, and which indicator columns it declares. The catalog is read-only
//! input; a broken catalog is a fatal configuration error.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Disclosure file format, dispatched by a closed set of parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Xlsx,
    Xls,
    Pdf,
}

impl SourceFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(SourceFormat::Csv),
            "xlsx" => Some(SourceFormat::Xlsx),
            "xls" => Some(SourceFormat::Xls),
            "pdf" => Some(SourceFormat::Pdf),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Xls => "xls",
            SourceFormat::Pdf => "pdf",
        }
    }

    /// File extension used when storing downloaded artifacts.
    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Csv => ".csv",
            SourceFormat::Xlsx => ".xlsx",
            SourceFormat::Xls => ".xls",
            SourceFormat::Pdf => ".pdf",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry for a regulator data source.
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    pub country: String,
    pub regulator: String,
    /// Declared bank name, matched against the registry by slug.
    pub bank: String,
    pub url: String,
    pub format: SourceFormat,
    pub frequency: String,
    /// Indicator names the source declares, matched against the catalog by slug.
    pub indicators: Vec<String>,
    pub description: Option<String>,
    pub encoding: Option<String>,
    pub worksheet: Option<String>,
}

impl SourceDefinition {
    /// Filesystem-safe identifier used for downloaded artifact names.
    pub fn slug(&self) -> String {
        self.id.replace(' ', "_")
    }
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    id: String,
    name: String,
    country: String,
    regulator: String,
    bank: String,
    url: String,
    format: String,
    frequency: String,
    #[serde(default)]
    indicators: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    worksheet: Option<String>,
}

/// Load and validate the source catalog at `path`.
pub fn load_catalog(path: &Path) -> Result<Vec<SourceDefinition>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::config(format!("Source catalog not found at '{}': {e}", path.display()))
    })?;
    let raw: RawCatalog = serde_yaml::from_str(&text)
        .map_err(|e| AppError::config(format!("Failed to parse source catalog: {e}")))?;
    if raw.sources.is_empty() {
        return Err(AppError::config(
            "Catalog does not define any sources under 'sources'",
        ));
    }
    raw.sources.into_iter().map(validate).collect()
}

fn validate(raw: RawSource) -> Result<SourceDefinition, AppError> {
    let format = SourceFormat::parse(&raw.format).ok_or_else(|| {
        AppError::config(format!(
            "Unsupported format '{}' for source '{}'",
            raw.format, raw.id
        ))
    })?;
    Ok(SourceDefinition {
        id: raw.id,
        name: raw.name,
        country: raw.country,
        regulator: raw.regulator,
        bank: raw.bank,
        url: raw.url,
        format,
        frequency: raw.frequency,
        indicators: raw.indicators,
        description: raw.description,
        encoding: raw.encoding,
        worksheet: raw.worksheet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_catalog_parses_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
sources:
  - id: sib-gt-bi
    name: SIB quarterly ratios
    country: Guatemala
    regulator: SIB
    bank: Banco Industrial, S.A.
    url: https://example.com/bi.csv
    format: CSV
    frequency: quarterly
    indicators:
      - CET1/RWA
      - NPL
"#
        )
        .unwrap();

        let sources = load_catalog(file.path()).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].format, SourceFormat::Csv);
        assert_eq!(sources[0].indicators.len(), 2);
    }

    #[test]
    fn empty_catalog_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "sources: []").unwrap();

        let err = load_catalog(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
sources:
  - id: bad
    name: Bad
    country: GT
    regulator: SIB
    bank: Banco
    url: https://example.com/x.docx
    format: docx
    frequency: quarterly
"#
        )
        .unwrap();

        assert_eq!(load_catalog(file.path()).unwrap_err().exit_code(), 2);
    }
}
