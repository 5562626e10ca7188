//! Document data model: pages in, reviewed record out.
//!
//! A scan owns a list of [`PageAsset`]s and produces one
//! [`ProcessedDocument`]. The document moves through
//! [`DocumentStatus`] in one direction only:
//!
//! ```text
//! processing ──▶ reviewing ──▶ completed
//!      │                            ▲
//!      ├────────────────────────────┘   (auto-finalize fast path)
//!      └──▶ error                        (terminal)
//! ```
//!
//! Page bytes are shared through `Arc<[u8]>` so snapshots, crop tasks and
//! history entries never copy a photograph.

use crate::error::ScanError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

// ── Media types ──────────────────────────────────────────────────────────

/// Media type of a captured page or an encoded crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/webp")]
    Webp,
    #[serde(rename = "application/pdf")]
    Pdf,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Webp => "image/webp",
            MediaType::Pdf => "application/pdf",
        }
    }

    /// File extension used when a page or crop is written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "jpg",
            MediaType::Png => "png",
            MediaType::Webp => "webp",
            MediaType::Pdf => "pdf",
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, MediaType::Pdf)
    }

    /// Identify the media type from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(MediaType::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(MediaType::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(MediaType::Jpeg)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(MediaType::Webp)
        } else {
            None
        }
    }

    /// Guess the media type from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "webp" => Some(MediaType::Webp),
            "pdf" => Some(MediaType::Pdf),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(MediaType::Jpeg),
            "image/png" => Ok(MediaType::Png),
            "image/webp" => Ok(MediaType::Webp),
            "application/pdf" => Ok(MediaType::Pdf),
            other => Err(ScanError::UnsupportedMediaType {
                mime: other.to_string(),
            }),
        }
    }
}

// ── Pages ────────────────────────────────────────────────────────────────

/// One captured or uploaded page. Immutable once constructed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAsset {
    #[serde(with = "base64_bytes")]
    data: Arc<[u8]>,
    mime_type: MediaType,
}

impl PageAsset {
    pub fn new(data: impl Into<Arc<[u8]>>, mime_type: MediaType) -> Self {
        Self {
            data: data.into(),
            mime_type,
        }
    }

    /// Build a page from base64 text (with or without a `data:` URI prefix).
    pub fn from_base64(text: &str, mime_type: MediaType) -> Result<Self, ScanError> {
        let payload = match text.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => text,
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| ScanError::InvalidInput {
                input: format!("base64 page payload: {e}"),
            })?;
        Ok(Self::new(bytes, mime_type))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> MediaType {
        self.mime_type
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.is_pdf()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl fmt::Debug for PageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageAsset")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ── Graphics ─────────────────────────────────────────────────────────────

/// `[ymin, xmin, ymax, xmax]`, each normalised to 0–1000 against the pixel
/// size of the page the box was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox(pub [i32; 4]);

impl BoundingBox {
    pub fn new(ymin: i32, xmin: i32, ymax: i32, xmax: i32) -> Self {
        Self([ymin, xmin, ymax, xmax])
    }

    pub fn ymin(&self) -> i32 {
        self.0[0]
    }

    pub fn xmin(&self) -> i32 {
        self.0[1]
    }

    pub fn ymax(&self) -> i32 {
        self.0[2]
    }

    pub fn xmax(&self) -> i32 {
        self.0[3]
    }
}

/// A region the model proposed as a chart, diagram or table image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedGraphic {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    /// 0-based index into the document's page list.
    pub page_index: usize,
}

/// Encoded raster bytes plus the size of the encoded image.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: MediaType,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// A detected graphic that was cropped successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedGraphic {
    /// Stable within one document: `graphic-<n>` where n is the position
    /// of the entry in the model's graphics array.
    pub id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub label: String,
    /// Page the crop was actually taken from.
    pub page_index: usize,
    pub image: EncodedImage,
    /// User inclusion flag. Candidates start selected.
    pub selected: bool,
}

// ── Document ─────────────────────────────────────────────────────────────

/// Unique identity of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Reviewing,
    Completed,
    Error,
}

impl DocumentStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Processing, Reviewing) | (Processing, Completed) | (Processing, Error) | (Reviewing, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Error)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Reviewing => "reviewing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Candidates awaiting a user decision. Present only while reviewing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewData {
    pub detected_categories: Vec<String>,
    pub potential_graphics: Vec<ExtractedGraphic>,
    /// Pre-selected category: the first candidate, or `General`.
    pub selected_category: String,
}

/// The aggregate record produced by one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub id: DocumentId,
    pub timestamp: DateTime<Utc>,
    pub pages: Vec<PageAsset>,
    pub file_name: Option<String>,
    pub detected_title: Option<String>,
    pub category: Option<String>,
    pub summary: String,
    /// Raw accumulated model output while processing; the cleaned
    /// extracted-content section afterwards.
    pub detailed_content: String,
    pub graphics: Vec<ExtractedGraphic>,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub review_data: Option<ReviewData>,
}

impl ProcessedDocument {
    /// A fresh document in `processing` with empty content fields.
    pub fn new(pages: Vec<PageAsset>, file_name: Option<String>) -> Self {
        Self {
            id: DocumentId::new(),
            timestamp: Utc::now(),
            pages,
            file_name,
            detected_title: None,
            category: None,
            summary: String::new(),
            detailed_content: String::new(),
            graphics: Vec::new(),
            status: DocumentStatus::Processing,
            error: None,
            review_data: None,
        }
    }

    /// Graphics meant for export.
    pub fn selected_graphics(&self) -> impl Iterator<Item = &ExtractedGraphic> {
        self.graphics.iter().filter(|g| g.selected)
    }

    /// Title for lists and file names: detected title, then file name.
    pub fn display_title(&self) -> &str {
        self.detected_title
            .as_deref()
            .or(self.file_name.as_deref())
            .unwrap_or("Document")
    }
}

// ── Serde helper ─────────────────────────────────────────────────────────

/// Binary payloads travel as base64 strings in JSON.
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: From<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(T::from)
            .map_err(serde::de::Error::custom)
    }
}
