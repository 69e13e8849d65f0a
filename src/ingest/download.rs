//! Source artifact download with retry and content hashing.
//!
//! Supports `http(s)` URLs via a blocking client and `file:`/plain paths for
//! locally mirrored disclosures. Every artifact gets a SHA-256 checksum so
//! downstream stages can tie observations back to exact file contents.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::catalog::SourceDefinition;
use crate::error::AppError;

/// Retry/timeout knobs for a download batch.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Metadata for a downloaded source artifact.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub elapsed: Duration,
}

/// Download `source` into `directory`, retrying with linear backoff.
pub fn download_source(
    source: &SourceDefinition,
    directory: &Path,
    options: &DownloadOptions,
) -> Result<DownloadResult, AppError> {
    std::fs::create_dir_all(directory).map_err(|e| {
        AppError::external(format!(
            "Failed to create download directory '{}': {e}",
            directory.display()
        ))
    })?;
    let target = resolve_filename(source, directory);

    let client = Client::builder()
        .timeout(options.timeout)
        .build()
        .map_err(|e| AppError::external(format!("Failed to build HTTP client: {e}")))?;

    let mut last_error: Option<AppError> = None;
    for attempt in 1..=options.retries.max(1) {
        let start = Instant::now();
        match fetch_once(&client, &source.url, &target) {
            Ok(content_type) => {
                let elapsed = start.elapsed();
                let sha256 = hash_file(&target)?;
                let size_bytes = std::fs::metadata(&target)
                    .map_err(|e| {
                        AppError::external(format!(
                            "Failed to stat downloaded file '{}': {e}",
                            target.display()
                        ))
                    })?
                    .len();
                return Ok(DownloadResult {
                    path: target,
                    sha256,
                    size_bytes,
                    content_type,
                    elapsed,
                });
            }
            Err(err) => {
                last_error = Some(err);
                if attempt < options.retries {
                    std::thread::sleep(options.backoff * attempt);
                }
            }
        }
    }

    let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(AppError::external(format!(
        "Failed to download {} after {} attempts: {detail}",
        source.url, options.retries
    )))
}

fn fetch_once(client: &Client, url: &str, target: &Path) -> Result<Option<String>, AppError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        fetch_http(client, url, target)
    } else {
        let local = url.strip_prefix("file://").unwrap_or(url);
        copy_local(Path::new(local), target)
    }
}

fn fetch_http(client: &Client, url: &str, target: &Path) -> Result<Option<String>, AppError> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| AppError::external(format!("Request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(AppError::external(format!(
            "Request failed with status {}",
            response.status()
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut file = File::create(target).map_err(|e| {
        AppError::external(format!("Failed to create '{}': {e}", target.display()))
    })?;
    response
        .copy_to(&mut file)
        .map_err(|e| AppError::external(format!("Failed to write '{}': {e}", target.display())))?;
    Ok(content_type)
}

fn copy_local(source: &Path, target: &Path) -> Result<Option<String>, AppError> {
    if !source.exists() {
        return Err(AppError::external(format!(
            "Local file '{}' does not exist",
            source.display()
        )));
    }
    std::fs::copy(source, target).map_err(|e| {
        AppError::external(format!(
            "Failed to copy '{}' to '{}': {e}",
            source.display(),
            target.display()
        ))
    })?;
    Ok(None)
}

fn resolve_filename(source: &SourceDefinition, directory: &Path) -> PathBuf {
    let timestamp = Utc::now().timestamp_millis();
    directory.join(format!(
        "{}_{timestamp}{}",
        source.slug(),
        source.format.extension()
    ))
}

fn hash_file(path: &Path) -> Result<String, AppError> {
    let mut file = File::open(path)
        .map_err(|e| AppError::external(format!("Failed to open '{}': {e}", path.display())))?;
    let mut digest = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| AppError::external(format!("Failed to read '{}': {e}", path.display())))?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(hex::encode(digest.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceFormat;
    use std::io::Write;

    fn demo_source(url: String) -> SourceDefinition {
        SourceDefinition {
            id: "demo-source".to_string(),
            name: "Demo".to_string(),
            country: "Guatemala".to_string(),
            regulator: "SIB".to_string(),
            bank: "Banco Demo".to_string(),
            url,
            format: SourceFormat::Csv,
            frequency: "quarterly".to_string(),
            indicators: vec![],
            description: None,
            encoding: None,
            worksheet: None,
        }
    }

    #[test]
    fn local_file_download_hashes_content() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        let mut file = File::create(&input).unwrap();
        writeln!(file, "Year,Quarter,NPL").unwrap();
        writeln!(file, "2024,Q1,2.5%").unwrap();

        let source = demo_source(input.display().to_string());
        let result =
            download_source(&source, &dir.path().join("raw"), &DownloadOptions::default()).unwrap();

        assert!(result.path.exists());
        assert_eq!(result.sha256.len(), 64);
        assert!(result.size_bytes > 0);
    }

    #[test]
    fn missing_local_file_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let source = demo_source(dir.path().join("missing.csv").display().to_string());
        let options = DownloadOptions {
            retries: 2,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        };

        let err = download_source(&source, &dir.path().join("raw"), &options).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
