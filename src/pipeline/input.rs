//! Page source: turn a user-supplied path or URL into a [`PageAsset`].
//!
//! Bytes are read whole (local file or HTTP download), the media type is
//! sniffed from the magic bytes and only falls back to the file extension
//! when the bytes are not recognised. Raster pages are normalised by
//! [`crate::pipeline::encode::normalize_page`]; PDFs pass through untouched
//! because the model reads them natively and the cropper skips them.

use crate::config::ScanConfig;
use crate::document::{MediaType, PageAsset};
use crate::error::ScanError;
use crate::pipeline::encode::normalize_page;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load every input in order as one document's pages.
pub async fn load_pages(inputs: &[String], config: &ScanConfig) -> Result<Vec<PageAsset>, ScanError> {
    if inputs.is_empty() {
        return Err(ScanError::NoPages);
    }
    let mut pages = Vec::with_capacity(inputs.len());
    for input in inputs {
        pages.push(load_page(input, config).await?);
    }
    Ok(pages)
}

/// Load a single page from a local path or an HTTP(S) URL.
pub async fn load_page(input: &str, config: &ScanConfig) -> Result<PageAsset, ScanError> {
    let bytes = if is_url(input) {
        download_url(input, config.download_timeout_secs).await?
    } else {
        read_local(input).await?
    };
    page_from_bytes(bytes, input, config).await
}

/// Sniff, validate and normalise raw page bytes.
pub async fn page_from_bytes(
    bytes: Vec<u8>,
    source_name: &str,
    config: &ScanConfig,
) -> Result<PageAsset, ScanError> {
    let mime = MediaType::sniff(&bytes)
        .or_else(|| extension_of(source_name).and_then(MediaType::from_extension))
        .ok_or_else(|| ScanError::UnsupportedMediaType {
            mime: extension_of(source_name)
                .map(|e| format!(".{e}"))
                .unwrap_or_else(|| "unknown".to_string()),
        })?;

    if mime.is_pdf() {
        debug!("{}: PDF page, {} bytes, passed through", source_name, bytes.len());
        return Ok(PageAsset::new(bytes, mime));
    }

    let max_width = config.max_page_width;
    let quality = config.page_jpeg_quality;
    let original_len = bytes.len();
    let page = tokio::task::spawn_blocking(move || normalize_page(&bytes, max_width, quality))
        .await
        .map_err(|e| ScanError::Internal(format!("Page encode task panicked: {}", e)))?
        .map_err(|e| ScanError::ImageDecodeFailed {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        })?;

    debug!(
        "{}: {} page {} bytes → {} bytes JPEG",
        source_name,
        mime,
        original_len,
        page.data().len()
    );
    Ok(page)
}

/// Name a document after its first input, or after the wall-clock time.
pub fn default_file_name(inputs: &[String]) -> String {
    inputs
        .first()
        .and_then(|first| {
            let path = if is_url(first) {
                reqwest::Url::parse(first)
                    .ok()
                    .and_then(|u| u.path_segments()?.next_back().map(PathBuf::from))?
            } else {
                PathBuf::from(first)
            };
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| format!("Scan {}", Local::now().format("%H:%M:%S")))
}

fn extension_of(source_name: &str) -> Option<&str> {
    let name = source_name.split(['?', '#']).next().unwrap_or(source_name);
    Path::new(name).extension().and_then(|e| e.to_str())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ScanError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local page: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ScanError::PermissionDenied { path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ScanError::FileNotFound { path }),
        Err(_) if path.is_dir() => Err(ScanError::InvalidInput {
            input: path_str.to_string(),
        }),
        Err(_) => Err(ScanError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ScanError> {
    info!("Downloading page from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScanError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ScanError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ScanError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(ScanError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
