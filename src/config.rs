//! Configuration types for document scanning.
//!
//! Every knob lives in [`ScanConfig`], built via its [`ScanConfigBuilder`].
//! One struct is shared by the page source, the analysis engine, the
//! cropper and the lifecycle controller so two runs can be compared by
//! diffing their configs.

use crate::error::ScanError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for scanning one or more documents.
///
/// # Example
/// ```rust
/// use mediscan::{CropFormat, ReviewPolicy, ScanConfig};
///
/// let config = ScanConfig::builder()
///     .model("gemini-2.0-flash")
///     .crop_format(CropFormat::Png)
///     .review_policy(ReviewPolicy::DropDeselected)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "anthropic").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the analysis call. Default: 0.1.
    ///
    /// Transcription wants the model to copy what it sees, dosages included.
    pub temperature: f32,

    /// Maximum tokens the model may generate for one document. Default: 8192.
    ///
    /// The response carries the full extracted text of every page plus the
    /// summary and graphics JSON, so it runs longer than a single page.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient API failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom system instruction. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Raster format of cropped graphics. Default: JPEG quality 85.
    pub crop_format: CropFormat,

    /// What happens to deselected graphics when a review is resolved.
    /// Default: [`ReviewPolicy::KeepDeselected`].
    pub review_policy: ReviewPolicy,

    /// Page-source downscale cap in pixels (width). Default: 1024.
    ///
    /// Phone photos are 4000+ px wide; 1024 px keeps small print legible
    /// for the model while keeping the request body small.
    pub max_page_width: u32,

    /// JPEG quality used when the page source re-encodes photos. Default: 70.
    pub page_jpeg_quality: u8,

    /// Download timeout for URL pages in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Notification sink. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            system_prompt: None,
            crop_format: CropFormat::default(),
            review_policy: ReviewPolicy::default(),
            max_page_width: 1024,
            page_jpeg_quality: 70,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("crop_format", &self.crop_format)
            .field("review_policy", &self.review_policy)
            .field("max_page_width", &self.max_page_width)
            .field("page_jpeg_quality", &self.page_jpeg_quality)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ScanProgressCallback>"),
            )
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn crop_format(mut self, format: CropFormat) -> Self {
        self.config.crop_format = format;
        self
    }

    pub fn review_policy(mut self, policy: ReviewPolicy) -> Self {
        self.config.review_policy = policy;
        self
    }

    pub fn max_page_width(mut self, px: u32) -> Self {
        self.config.max_page_width = px;
        self
    }

    pub fn page_jpeg_quality(mut self, quality: u8) -> Self {
        self.config.page_jpeg_quality = quality;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        let c = &self.config;
        if c.max_page_width < 64 {
            return Err(ScanError::InvalidConfig(format!(
                "max_page_width must be ≥ 64, got {}",
                c.max_page_width
            )));
        }
        if !(1..=100).contains(&c.page_jpeg_quality) {
            return Err(ScanError::InvalidConfig(format!(
                "page JPEG quality must be 1–100, got {}",
                c.page_jpeg_quality
            )));
        }
        if let CropFormat::Jpeg { quality } = c.crop_format {
            if !(1..=100).contains(&quality) {
                return Err(ScanError::InvalidConfig(format!(
                    "crop JPEG quality must be 1–100, got {quality}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output raster format for cropped graphics.
///
/// JPEG keeps report thumbnails small; PNG keeps chart lines and small
/// axis labels crisp at the cost of size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for CropFormat {
    fn default() -> Self {
        CropFormat::Jpeg { quality: 85 }
    }
}

/// How a resolved review treats graphics the user switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReviewPolicy {
    /// Keep every candidate with its `selected` flag; export filters on it. (default)
    #[default]
    KeepDeselected,
    /// Remove `selected = false` entries from the finalized document.
    DropDeselected,
}
