//! Error types for the mediscan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanError`]: **Fatal** for one scan: the document cannot be
//!   produced at all (unreadable page, provider not configured, the model
//!   rejected the request). The controller moves the document to
//!   [`crate::document::DocumentStatus::Error`] and stores the message.
//!
//! * [`CropError`]: **Non-fatal**: a single detected graphic could not be
//!   cropped. The graphic is omitted and every sibling crop still runs.
//!
//! Parse degradation (missing headers, garbled graphics JSON) has no error
//! type: the parser and decoder always return a value.

use crate::document::DocumentStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All errors that end a scan or reject a caller action.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Page file was not found at the given path.
    #[error("Page file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The page is neither a supported raster image nor a PDF.
    #[error("Unsupported media type '{mime}'. Expected image/jpeg, image/png, image/webp or application/pdf.")]
    UnsupportedMediaType { mime: String },

    /// The page claims to be an image but could not be decoded.
    #[error("Could not decode page image '{source_name}': {detail}")]
    ImageDecodeFailed { source_name: String, detail: String },

    /// A scan was started with an empty page list.
    #[error("A scan needs at least one page")]
    NoPages,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The analysis engine rejected the request or failed after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// A caller action is not legal in the document's current status.
    #[error("Cannot {action} a document in status '{from}'")]
    InvalidTransition {
        from: DocumentStatus,
        action: &'static str,
    },

    /// The action targets a document that is no longer the active one.
    #[error("No active document matches this scan")]
    NoActiveDocument,

    /// Export was requested for a document that has not been completed.
    #[error("Document is '{status}'; only completed documents can be exported")]
    NotFinalized { status: DocumentStatus },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a report file.
    #[error("Failed to write report file '{path}': {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recoverable failure while cropping one detected graphic.
///
/// Declined crops (PDF source, degenerate box) are not errors; they are
/// `Ok(None)` from [`crate::pipeline::crop::crop`].
#[derive(Debug, Clone, Error)]
pub enum CropError {
    /// The source page bytes could not be decoded as an image.
    #[error("Page {page}: image decode failed: {detail}")]
    Decode { page: usize, detail: String },

    /// The cropped region could not be encoded in the target format.
    #[error("Crop encoding failed: {detail}")]
    Encode { detail: String },

    /// The blocking crop task panicked or was cancelled.
    #[error("Crop task failed: {0}")]
    TaskFailed(String),
}
